use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (unknown source, bad family reference, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),

    /// Required column absent from an input table. Fatal, no partial output.
    #[error("table '{table}': missing column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A table that must be unique by key is not.
    #[error("table '{table}': duplicate key '{key}'")]
    DuplicateKey { table: String, key: String },

    /// The reconciliation or aggregation algorithm produced an impossible record.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl ReconError {
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// True for the programming-error class (hard stop, never a data problem).
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::InvariantViolation(_))
    }
}
