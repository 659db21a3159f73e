use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use super::{date_range_tasks, Context, EntrySource, Task};
use crate::derive::{derive_snapshot, ChecksumCache, Deriver, FileSelection};
use crate::error::{Error, Result};
use crate::inclusion::InclusionFilter;
use crate::snapshot::{retention, Origin, Snapshot, SnapshotEngine, SnapshotStore};

fn default_port() -> u16 {
    22
}

/// Snapshots of a remote (over SSH) or local directory
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsyncSource {
    pub key: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Unset for a local directory
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub path: String,
    /// Keep at most this many snapshots, unlimited when unset
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_until: Option<NaiveDate>,
}

impl RsyncSource {
    pub fn origin(&self) -> Origin {
        Origin {
            user: self.user.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
        }
    }

    pub fn snapshots(&self, backups_root: &Path) -> SnapshotStore {
        SnapshotStore::new(backups_root, self.source_type(), &self.key)
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(Error::Config(format!("source '{}' needs a path", self.key)));
        }
        if self.port == 0 {
            return Err(Error::Config(format!("source '{}': port must not be 0", self.key)));
        }
        if self.max_backups == Some(0) {
            return Err(Error::Config(format!("source '{}': max_backups must be at least 1", self.key)));
        }
        if self.user.is_some() && self.host.is_none() {
            return Err(Error::Config(format!("source '{}': user is set but host is not", self.key)));
        }
        Ok(())
    }

    /// True when `snapshot` will be the oldest one left after retention
    fn becomes_oldest(&self, retained: &[Snapshot], snapshot: &Snapshot) -> bool {
        let keep = self.max_backups.unwrap_or(usize::MAX).min(retained.len());
        retained[retained.len() - keep..].first() == Some(snapshot)
    }
}

impl EntrySource for RsyncSource {
    fn source_type(&self) -> &'static str {
        "rsync"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn process(&self, ctx: &mut Context, force: bool) -> Result<(usize, usize)> {
        let provenance = self.provenance();
        let snapshots = self.snapshots(&ctx.config.backups_root);
        let origin = self.origin();

        let engine = SnapshotEngine::new(&snapshots, ctx.transfer, &self.key, &origin, ctx.config);
        let created = engine.run(Utc::now())?;

        let newest = match (&created, force) {
            (Some(snapshot), _) => snapshot.clone(),
            (None, true) => match snapshots.latest()? {
                Some(snapshot) => snapshot,
                None => return Ok((0, 0)),
            },
            (None, false) => return Ok((0, 0)),
        };

        let filter = InclusionFilter::from_tree(&newest.files_path(), &ctx.config.timeline_include_file)?;
        let marker_changed = created.is_some() && filter.names_marker(newest.changes()?.iter().map(|c| c.path.as_path()));

        let cache = if force {
            ChecksumCache::default()
        } else {
            ChecksumCache::from_entries(&ctx.store.entries_for_source(&provenance)?)
        };
        let mut deriver = Deriver::new(&provenance, ctx.config, ctx.extractors, cache);

        let retained = snapshots.list()?;
        let selection = if self.becomes_oldest(&retained, &newest) {
            FileSelection::All
        } else {
            FileSelection::Changed
        };
        let mut entries = derive_snapshot(&mut deriver, ctx.store, &newest, &filter, selection)?;

        let purged = retention::purge(&snapshots, ctx.store, &provenance, self.max_backups)?;
        let retained = snapshots.list()?;

        if marker_changed || force {
            if marker_changed {
                info!(source = %provenance, marker = %ctx.config.timeline_include_file, "inclusion rules changed, reprocessing all snapshots");
            }
            for (i, snapshot) in retained.iter().enumerate() {
                if *snapshot == newest {
                    continue;
                }
                let selection = if i == 0 { FileSelection::All } else { FileSelection::Changed };
                entries += derive_snapshot(&mut deriver, ctx.store, snapshot, &filter, selection)?;
            }
        } else if !purged.is_empty() {
            // files older than the purged snapshots now only show up in the
            // oldest one's full listing
            if let Some(oldest) = retained.first().filter(|s| **s != newest) {
                entries += derive_snapshot(&mut deriver, ctx.store, oldest, &filter, FileSelection::All)?;
            }
        }

        Ok((entries, 0))
    }

    fn preprocessing_tasks(&self) -> Vec<Task> {
        let mut tasks = vec![Task::RequireTool("rsync")];
        if self.host.is_some() {
            tasks.push(Task::RequireTool("ssh"));
        }
        tasks
    }

    fn postprocessing_tasks(&self) -> Vec<Task> {
        let mut tasks = vec![Task::DropOrphans];
        tasks.extend(date_range_tasks(self.date_from, self.date_until));
        tasks
    }
}
