//! Sources: where entries come from.
//!
//! Each kind of source is its own type implementing [`EntrySource`]. The
//! config file picks one with `type = "..."`:
//! - `rsync`: snapshots of a remote or local directory, entries from files
//! - `filesystem`: a mounted directory, processed in place
//! - `json`: an exported entry dump, re-imported under this source

pub mod archive;
pub mod filesystem;
pub mod rsync;

pub use archive::JsonArchive;
pub use filesystem::FilesystemSource;
pub use rsync::RsyncSource;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::Extractors;
use crate::platform;
use crate::snapshot::Transfer;
use crate::store::EntryStore;

/// Everything a source needs while processing
pub struct Context<'a> {
    pub config: &'a Config,
    pub store: &'a mut EntryStore,
    pub extractors: &'a dyn Extractors,
    pub transfer: &'a dyn Transfer,
}

/// Work the scheduler runs around `process`
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    RequireTool(&'static str),
    /// Drop entries of the source dated outside the range (both ends inclusive)
    DeleteOutsideDateRange {
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    },
    /// Drop file entries whose file is no longer on disk
    DropOrphans,
}

impl Task {
    pub fn run(&self, provenance: &str, ctx: &mut Context) -> Result<()> {
        match self {
            Task::RequireTool(tool) => platform::require_tool(tool),
            Task::DeleteOutsideDateRange { from, until } => {
                let deleted = ctx.store.delete_outside_date_range(provenance, *from, *until)?;
                if deleted > 0 {
                    info!(source = provenance, deleted, "deleted entries outside the date range");
                }
                Ok(())
            }
            Task::DropOrphans => {
                ctx.store.live_file_entries(provenance)?;
                Ok(())
            }
        }
    }
}

pub trait EntrySource {
    fn source_type(&self) -> &'static str;

    fn key(&self) -> &str;

    /// Stamped on every entry this source creates
    fn provenance(&self) -> String {
        format!("{}/{}", self.source_type(), self.key())
    }

    /// Run the source. Returns (created, updated) entry counts.
    fn process(&self, ctx: &mut Context, force: bool) -> Result<(usize, usize)>;

    fn preprocessing_tasks(&self) -> Vec<Task> {
        Vec::new()
    }

    fn postprocessing_tasks(&self) -> Vec<Task> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    Rsync(RsyncSource),
    Filesystem(FilesystemSource),
    Json(JsonArchive),
}

impl Source {
    pub fn as_entry_source(&self) -> &dyn EntrySource {
        match self {
            Source::Rsync(s) => s,
            Source::Filesystem(s) => s,
            Source::Json(s) => s,
        }
    }

    pub fn key(&self) -> &str {
        self.as_entry_source().key()
    }

    pub fn source_type(&self) -> &'static str {
        self.as_entry_source().source_type()
    }

    pub fn provenance(&self) -> String {
        self.as_entry_source().provenance()
    }

    /// Human readable origin for listings
    pub fn describe(&self) -> String {
        match self {
            Source::Rsync(s) => s.origin().rsync_arg(),
            Source::Filesystem(s) => s.path.display().to_string(),
            Source::Json(s) => s.path.display().to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let key = self.key();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::Config(format!(
                "source key '{key}' must be non-empty and only contain letters, digits, '-' and '_'"
            )));
        }

        let (from, until) = match self {
            Source::Rsync(s) => (s.date_from, s.date_until),
            Source::Filesystem(s) => (s.date_from, s.date_until),
            Source::Json(s) => (s.date_from, s.date_until),
        };
        if let (Some(from), Some(until)) = (from, until) {
            if from > until {
                return Err(Error::Config(format!("source '{key}': date_from is after date_until")));
            }
        }

        match self {
            Source::Rsync(s) => s.validate(),
            Source::Filesystem(s) => {
                if s.path.as_os_str().is_empty() {
                    return Err(Error::Config(format!("source '{key}' needs a path")));
                }
                Ok(())
            }
            Source::Json(s) => {
                if s.path.as_os_str().is_empty() {
                    return Err(Error::Config(format!("source '{key}' needs a path")));
                }
                Ok(())
            }
        }
    }
}

/// Postprocessing shared by every source type: honour `date_from` and
/// `date_until` if either is set.
pub(crate) fn date_range_tasks(from: Option<NaiveDate>, until: Option<NaiveDate>) -> Vec<Task> {
    if from.is_none() && until.is_none() {
        return Vec::new();
    }
    vec![Task::DeleteOutsideDateRange {
        from: from.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc()),
        until: until.and_then(|d| d.and_hms_opt(23, 59, 59)).map(|d| d.and_utc()),
    }]
}
