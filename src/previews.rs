//! Where preview artifacts (thumbnails, transcodes) of file entries live.
//!
//! Previews are keyed by checksum, so identical files across snapshots share
//! one preview. Generating them is left to a consumer; `lifelog previews`
//! lists where each one belongs, walking
//! [`EntryStore::live_file_entries`](crate::store::EntryStore::live_file_entries)
//! so entries whose file vanished are cleaned up first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::entry::Entry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewTarget {
    pub title: String,
    pub source_file: PathBuf,
    pub dir: PathBuf,
    pub generated: bool,
}

/// `{previews_root}/{source_type}/{key}/{checksum}`, or `None` for entries
/// without a file.
pub fn preview_dir(previews_root: &Path, entry: &Entry) -> Option<PathBuf> {
    let attrs = entry.file()?;
    Some(previews_root.join(&entry.source).join(&attrs.file.checksum))
}

/// One target per distinct content; the first entry with a checksum wins.
pub fn targets(previews_root: &Path, entries: &[Entry]) -> Vec<PreviewTarget> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| {
            let dir = preview_dir(previews_root, entry)?;
            if !seen.insert(dir.clone()) {
                return None;
            }
            let source_file = entry.file()?.file.path.clone();
            Some(PreviewTarget {
                title: entry.title.clone(),
                source_file,
                generated: dir.is_dir(),
                dir,
            })
        })
        .collect()
}
