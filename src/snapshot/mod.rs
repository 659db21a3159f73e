//! Dated snapshots of a backed-up tree.
//!
//! Layout for one source:
//!
//! ```text
//! {backups_root}/{source_type}/{key}/
//!     2024-05-01T10.00.00Z/files/...       the tree as of that run
//!     2024-05-01T10.00.00Z/transfer.log    rsync's itemized changes
//!     latest -> 2024-05-01T10.00.00Z       relative symlink
//! ```
//!
//! Snapshot names sort chronologically, so listing is a sorted directory read.
//! Unchanged files are hard links into the previous snapshot.

pub mod changelog;
pub mod engine;
pub mod retention;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use tracing::debug;

use crate::entry;
use crate::error::{Error, Result};

pub use changelog::{ChangeAction, ChangeRecord};
pub use engine::{Origin, RsyncTransfer, SnapshotEngine, Transfer, TransferOutcome, TransferRequest};

/// Directory name format. Colons would break rsync's `host:path` syntax.
pub const DIR_FORMAT: &str = "%Y-%m-%dT%H.%M.%SZ";
pub const LATEST_LINK: &str = "latest";
pub const FILES_DIR: &str = "files";
pub const LOG_FILE: &str = "transfer.log";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Snapshot {
    date: DateTime<Utc>,
    root: PathBuf,
}

impl Snapshot {
    /// A snapshot for an existing directory, named by its timestamp.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidSnapshotName(root.display().to_string()))?;
        let date = NaiveDateTime::parse_from_str(name, DIR_FORMAT)
            .map_err(|_| Error::InvalidSnapshotName(name.to_string()))?
            .and_utc();
        Ok(Snapshot {
            date,
            root: root.to_path_buf(),
        })
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn name(&self) -> String {
        self.date.format(DIR_FORMAT).to_string()
    }

    /// The `backup_date` stamped on entries derived from this snapshot
    pub fn backup_date(&self) -> String {
        entry::format_date(&self.date)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_path(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    /// Read and parse this snapshot's change log.
    pub fn changes(&self) -> Result<Vec<ChangeRecord>> {
        changelog::read_change_log(&self.log_path(), &self.files_path())
    }

    /// Every regular file in the snapshot, in walk order.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        regular_files(&self.files_path())
    }
}

/// Regular files below `root`, sorted by name within each directory.
/// Symlinks are not followed.
pub fn regular_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            Error::file(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// The snapshot directories of one source.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(backups_root: &Path, source_type: &str, key: &str) -> Self {
        SnapshotStore {
            root: backups_root.join(source_type).join(key),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Retained snapshots, oldest first. Anything that is not a snapshot
    /// directory (the `latest` link, stray files, leftovers with other names)
    /// is ignored.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::file(&self.root, e)),
        };

        let mut snapshots = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::file(&self.root, e))?;
            let file_type = entry.file_type().map_err(|e| Error::file(entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }
            if let Ok(snapshot) = Snapshot::from_dir(&entry.path()) {
                snapshots.push(snapshot);
            }
        }

        snapshots.sort();
        Ok(snapshots)
    }

    pub fn oldest(&self) -> Result<Option<Snapshot>> {
        Ok(self.list()?.into_iter().next())
    }

    /// The snapshot `latest` points at, if the link exists and resolves to a
    /// snapshot directory.
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        let link = self.root.join(LATEST_LINK);
        let target = match fs::read_link(&link) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::file(link, e)),
        };

        let dir = self.root.join(target);
        if !dir.is_dir() {
            return Ok(None);
        }
        Ok(Snapshot::from_dir(&dir).ok())
    }

    /// Find a retained snapshot by directory name.
    pub fn get(&self, name: &str) -> Result<Snapshot> {
        let snapshot = Snapshot::from_dir(&self.root.join(name))?;
        if !snapshot.root().is_dir() {
            return Err(Error::InvalidSnapshotName(name.to_string()));
        }
        Ok(snapshot)
    }

    /// Create the directory for a new snapshot taken at `now`. The new
    /// snapshot always sorts after every existing one: when `now` is not
    /// later than the newest snapshot, or that second is already taken, the
    /// timestamp moves forward one second at a time.
    pub fn allocate(&self, now: DateTime<Utc>) -> Result<Snapshot> {
        fs::create_dir_all(&self.root).map_err(|e| Error::file(&self.root, e))?;

        let mut date = now.with_nanosecond(0).unwrap_or(now);
        if let Some(newest) = self.list()?.last() {
            if newest.date >= date {
                date = newest.date + Duration::seconds(1);
            }
        }
        loop {
            let root = self.root.join(date.format(DIR_FORMAT).to_string());
            match fs::create_dir(&root) {
                Ok(()) => {
                    let snapshot = Snapshot { date, root };
                    let files = snapshot.files_path();
                    fs::create_dir(&files).map_err(|e| Error::file(files, e))?;
                    debug!(snapshot = %snapshot.root.display(), "allocated snapshot directory");
                    return Ok(snapshot);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    date += Duration::seconds(1);
                }
                Err(e) => return Err(Error::file(root, e)),
            }
        }
    }

    /// Point `latest` at `snapshot`. A temporary link is renamed over the old
    /// one so readers never see the link missing.
    pub fn set_latest(&self, snapshot: &Snapshot) -> Result<()> {
        let link = self.root.join(LATEST_LINK);
        let tmp = self.root.join(format!(".{LATEST_LINK}.tmp"));

        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::file(tmp, e)),
        }

        // relative target so the backups root can be moved
        std::os::unix::fs::symlink(snapshot.name(), &tmp).map_err(|e| Error::file(&tmp, e))?;
        fs::rename(&tmp, &link).map_err(|e| Error::file(link, e))?;
        Ok(())
    }

    /// Remove a snapshot directory that never became a retained snapshot.
    pub fn discard(&self, snapshot: &Snapshot) -> Result<()> {
        fs::remove_dir_all(snapshot.root()).map_err(|e| Error::file(snapshot.root(), e))
    }
}
