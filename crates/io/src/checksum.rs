//! Content checksums over canonical table bytes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use traitlist_recon::Table;

use crate::csv::to_canonical_bytes;
use crate::error::TableError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgo {
    #[default]
    Blake3,
    Sha256,
}

impl ChecksumAlgo {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgo::Blake3 => "blake3",
            ChecksumAlgo::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgo {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blake3" => Ok(ChecksumAlgo::Blake3),
            "sha256" => Ok(ChecksumAlgo::Sha256),
            other => Err(TableError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Lowercase hex digest of `data`.
pub fn checksum_bytes(algo: ChecksumAlgo, data: &[u8]) -> String {
    match algo {
        ChecksumAlgo::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(data);
            hasher.finalize().to_hex().to_string()
        }
        ChecksumAlgo::Sha256 => Sha256::digest(data)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    }
}

/// Digest of the table's canonical CSV serialization.
pub fn checksum_table(algo: ChecksumAlgo, table: &Table) -> Result<String, TableError> {
    let bytes = to_canonical_bytes(table).map_err(|e| TableError::csv(&table.name, e))?;
    Ok(checksum_bytes(algo, &bytes))
}

/// Digest of a file's raw bytes.
pub fn checksum_file(algo: ChecksumAlgo, path: &Path) -> Result<String, TableError> {
    let bytes = std::fs::read(path).map_err(|e| TableError::io(path, e))?;
    Ok(checksum_bytes(algo, &bytes))
}
