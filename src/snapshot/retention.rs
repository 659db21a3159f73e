use std::fs;

use tracing::info;

use super::{Snapshot, SnapshotStore};
use crate::error::{Error, Result};
use crate::store::EntryStore;

/// Delete the oldest snapshots until at most `max_backups` remain, together
/// with their entries. Returns the purged snapshots, oldest first.
///
/// Each purge is one store transaction: entries are deleted, the directory is
/// removed, and only then is the deletion committed. A directory that cannot
/// be removed keeps its entries and stops the purge.
pub fn purge(
    snapshots: &SnapshotStore,
    store: &mut EntryStore,
    provenance: &str,
    max_backups: Option<usize>,
) -> Result<Vec<Snapshot>> {
    let Some(max_backups) = max_backups else {
        return Ok(Vec::new());
    };

    let retained = snapshots.list()?;
    if retained.len() <= max_backups {
        return Ok(Vec::new());
    }

    let excess = retained.len() - max_backups;
    info!(source = provenance, purging = excess, max_backups, "purging old snapshots");

    let mut purged = Vec::with_capacity(excess);
    for snapshot in retained.into_iter().take(excess) {
        let root = snapshot.root().to_path_buf();
        let deleted = store.delete_backup_with(provenance, &snapshot.backup_date(), || {
            fs::remove_dir_all(&root).map_err(|e| Error::file(&root, e))
        })?;
        info!(source = provenance, snapshot = %snapshot.name(), entries = deleted, "purged snapshot");
        purged.push(snapshot);
    }

    Ok(purged)
}
