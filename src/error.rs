//! Error types shared by the snapshot engine, the derivation pipeline and the
//! entry store.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure tied to a specific file or directory
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The transfer tool exited with a non-zero status. The partial snapshot,
    /// log included, has already been removed, so the tail of the log travels
    /// with the error.
    #[error("transfer for {source_key} failed (exit code {}): {log_tail}", code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
    Transfer {
        source_key: String,
        code: Option<i32>,
        log_tail: String,
    },

    #[error("transfer for {source_key} timed out after {}", humantime::format_duration(*timeout))]
    TransferTimeout { source_key: String, timeout: Duration },

    #[error("could not probe {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("could not read exif from {}: {source}", path.display())]
    Exif {
        path: PathBuf,
        #[source]
        source: exif::Error,
    },

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("not a snapshot directory name: {0}")]
    InvalidSnapshotName(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("no source with key '{0}'")]
    UnknownSource(String),
}

impl Error {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File { path: path.into(), source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
