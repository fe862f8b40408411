//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract. Scripts rely on them.
//!
//! | Code | Meaning                                                    |
//! |------|------------------------------------------------------------|
//! | 0    | Success (pipeline completed, or all verification checks pass) |
//! | 1    | Verification divergence (row count, columns, keys, values, checksum) |
//! | 2    | CLI usage error (bad arguments)                            |
//! | 3    | Schema error (required column absent)                      |
//! | 4    | Invariant violation (duplicate key, quantile ordering)     |
//! | 5    | I/O or parse error reading inputs / writing outputs        |
//! | 6    | Configuration error (config or manifest invalid)           |
//!
//! Data-quality defects never change the exit code.

use traitlist_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Engines diverge: at least one verification check failed.
/// Like `diff(1)`, exit 1 means "tables differ."
pub const EXIT_DIVERGENCE: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// A required column is absent from an input table.
pub const EXIT_SCHEMA: u8 = 3;

/// Duplicate keys in a unique table, or a statistics record out of order.
pub const EXIT_INVARIANT: u8 = 4;

/// Cannot read, decode or write a file.
pub const EXIT_IO: u8 = 5;

/// Pipeline config or verification manifest rejected.
pub const EXIT_CONFIG: u8 = 6;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG,
        ReconError::MissingColumn { .. } => EXIT_SCHEMA,
        ReconError::DuplicateKey { .. } | ReconError::InvariantViolation(_) => EXIT_INVARIANT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recon_errors_map_to_registry() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::missing_column("t", "c")), EXIT_SCHEMA);
        assert_eq!(
            recon_exit_code(&ReconError::InvariantViolation("q05 > q50".into())),
            EXIT_INVARIANT
        );
    }
}
