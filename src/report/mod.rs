//! CLI output.
//!
//! - `table`: aligned plain-text tables for the terminal
//! - `json`: pretty JSON for scripting and `lifelog export`

pub mod json;
pub mod table;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;

/// One row of `lifelog snapshots`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub name: String,
    pub backup_date: String,
    pub files: usize,
    /// Apparent size; files shared with other snapshots are counted in each
    pub bytes: u64,
    pub latest: bool,
}

impl SnapshotSummary {
    pub fn collect(snapshot: &Snapshot, latest: bool) -> Result<Self> {
        let files = snapshot.files()?;
        let mut bytes = 0;
        for file in &files {
            bytes += std::fs::symlink_metadata(file).map_err(|e| Error::file(file, e))?.len();
        }
        Ok(SnapshotSummary {
            name: snapshot.name(),
            backup_date: snapshot.backup_date(),
            files: files.len(),
            bytes,
            latest,
        })
    }
}
