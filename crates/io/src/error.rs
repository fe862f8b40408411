use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    #[error("{}: no header row", path.display())]
    Empty { path: PathBuf },

    #[error("unknown checksum algorithm '{0}' (expected blake3 or sha256)")]
    UnknownAlgorithm(String),
}

impl TableError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TableError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: ::csv::Error) -> Self {
        TableError::Csv {
            path: path.into(),
            source,
        }
    }
}
