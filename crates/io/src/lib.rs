//! Table I/O for the trait shortlist pipeline.
//!
//! Reads delimited text into [`traitlist_recon::Table`], writes canonical CSV
//! atomically, and computes content checksums over the canonical bytes.

pub mod checksum;
pub mod csv;
pub mod error;

pub use checksum::ChecksumAlgo;
pub use error::TableError;
