//! `traitlist-recon` - Deterministic multi-source taxon reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded tables, returns records, canonical
//! output tables and a run summary. No CLI or IO dependencies.

pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod export;
pub mod model;
pub mod modelling;
pub mod normalize;
pub mod numeric;
pub mod occurrence;
pub mod quantile;
pub mod shortlist;
pub mod table;
pub mod traits;
pub mod union;

pub use config::PipelineConfig;
pub use engine::run;
pub use error::ReconError;
pub use model::{PipelineInput, PipelineResult, SourceTag, FamilyTag};
pub use table::Table;
