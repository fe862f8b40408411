//! Verification manifest: which table pairs to compare and how.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use traitlist_io::ChecksumAlgo;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest parse error: {0}")]
    Parse(String),

    #[error("manifest validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Default absolute tolerance for numeric cells.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub checksum: ChecksumAlgo,
    pub tables: Vec<TableSpec>,
}

/// One primary/reference table pair.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub primary: PathBuf,
    pub reference: PathBuf,
    #[serde(default = "default_key")]
    pub key: String,
    /// Row order is part of the contract: check it, and hash rows as written.
    #[serde(default)]
    pub order_sensitive: bool,
    /// Overrides the manifest tolerance for this table.
    #[serde(default)]
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub column_tolerance: BTreeMap<String, f64>,
}

pub fn default_tolerance() -> f64 {
    1e-6
}

pub fn default_key() -> String {
    "canonical_id".into()
}

impl Manifest {
    pub fn from_toml(input: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            toml::from_str(input).map_err(|e| ManifestError::Parse(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        check_tolerance("tolerance", self.tolerance)?;
        if self.tables.is_empty() {
            return Err(ManifestError::Validation(
                "at least one [[tables]] entry is required".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(ManifestError::Validation(format!(
                    "duplicate table name '{}'",
                    table.name
                )));
            }
            if table.key.trim().is_empty() {
                return Err(ManifestError::Validation(format!(
                    "table '{}': key must not be empty",
                    table.name
                )));
            }
            if let Some(tol) = table.tolerance {
                check_tolerance(&format!("table '{}': tolerance", table.name), tol)?;
            }
            for (column, tol) in &table.column_tolerance {
                check_tolerance(
                    &format!("table '{}': column_tolerance '{column}'", table.name),
                    *tol,
                )?;
            }
        }
        Ok(())
    }

    /// Resolve relative table paths against `base` (the manifest's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for table in &mut self.tables {
            table.primary = base.join(&table.primary);
            table.reference = base.join(&table.reference);
        }
    }
}

impl TableSpec {
    pub fn effective_tolerance(&self, default: f64) -> f64 {
        self.tolerance.unwrap_or(default)
    }
}

fn check_tolerance(what: &str, value: f64) -> Result<(), ManifestError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ManifestError::Validation(format!(
            "{what} must be a finite non-negative number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name = "engine parity"
checksum = "sha256"

[[tables]]
name = "shortlist"
primary = "out/shortlist_candidates.csv"
reference = "reference/shortlist_candidates.csv"
order_sensitive = true

[[tables]]
name = "worldclim"
primary = "out/worldclim_species_quantiles.csv"
reference = "reference/worldclim_species_quantiles.csv"
[tables.column_tolerance]
"bio_1_q05" = 0.5
"#;

    #[test]
    fn parses_defaults() {
        let m = Manifest::from_toml(MANIFEST).unwrap();
        assert_eq!(m.name, "engine parity");
        assert_eq!(m.tolerance, 1e-6);
        assert_eq!(m.checksum, ChecksumAlgo::Sha256);
        assert_eq!(m.tables.len(), 2);
        assert_eq!(m.tables[0].key, "canonical_id");
        assert!(m.tables[0].order_sensitive);
        assert!(!m.tables[1].order_sensitive);
        assert_eq!(m.tables[1].column_tolerance["bio_1_q05"], 0.5);
        assert_eq!(m.tables[1].effective_tolerance(m.tolerance), 1e-6);
    }

    #[test]
    fn resolves_relative_paths() {
        let mut m = Manifest::from_toml(MANIFEST).unwrap();
        m.resolve_paths(Path::new("/runs/a"));
        assert_eq!(
            m.tables[0].primary,
            PathBuf::from("/runs/a/out/shortlist_candidates.csv")
        );
    }

    #[test]
    fn rejects_negative_tolerance() {
        let bad = MANIFEST.replace("\"bio_1_q05\" = 0.5", "\"bio_1_q05\" = -0.5");
        let err = Manifest::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("bio_1_q05"));
    }

    #[test]
    fn rejects_duplicate_table_names() {
        let bad = MANIFEST.replace("name = \"worldclim\"", "name = \"shortlist\"");
        assert!(matches!(
            Manifest::from_toml(&bad),
            Err(ManifestError::Validation(_))
        ));
    }

    #[test]
    fn rejects_unknown_checksum() {
        let bad = MANIFEST.replace("\"sha256\"", "\"md5\"");
        assert!(matches!(Manifest::from_toml(&bad), Err(ManifestError::Parse(_))));
    }

    #[test]
    fn requires_tables() {
        let err = Manifest::from_toml("name = \"x\"\ntables = []\n").unwrap_err();
        assert!(err.to_string().contains("[[tables]]"));
    }
}
