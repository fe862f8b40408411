//! Library half of the `traitlist` binary: the keyed table diff, the
//! verification manifest and the reproducibility checks, testable without
//! spawning a process.

pub mod diff;
pub mod exit_codes;
pub mod manifest;
pub mod verifier;
