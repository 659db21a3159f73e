use std::io;
use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{date_range_tasks, Context, EntrySource, Task};
use crate::derive::{ChecksumCache, Deriver};
use crate::entry;
use crate::error::{Error, Result};
use crate::inclusion::InclusionFilter;
use crate::snapshot;

/// A mounted directory, processed in place without snapshots
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemSource {
    pub key: String,
    pub path: PathBuf,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_until: Option<NaiveDate>,
}

impl EntrySource for FilesystemSource {
    fn source_type(&self) -> &'static str {
        "filesystem"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn process(&self, ctx: &mut Context, force: bool) -> Result<(usize, usize)> {
        if !self.path.is_dir() {
            return Err(Error::file(
                &self.path,
                io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
            ));
        }

        let provenance = self.provenance();
        let filter = InclusionFilter::from_tree(&self.path, &ctx.config.timeline_include_file)?;

        let cache = if force {
            ChecksumCache::default()
        } else {
            ChecksumCache::from_entries(&ctx.store.entries_for_source(&provenance)?)
        };
        let mut deriver = Deriver::new(&provenance, ctx.config, ctx.extractors, cache);

        let files = snapshot::regular_files(&self.path)?;
        let backup_date = entry::format_date(&Utc::now());
        let entries = deriver.derive_entries(&self.path, &files, &filter, &backup_date)?;

        let created = ctx.store.replace_source_entries(&provenance, &entries)?;
        debug!(source = %provenance, files = files.len(), entries = created, "processed directory");
        Ok((created, 0))
    }

    fn postprocessing_tasks(&self) -> Vec<Task> {
        date_range_tasks(self.date_from, self.date_until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extract::{ExifTags, Extractors, MediaProbe};
    use crate::snapshot::{Transfer, TransferOutcome, TransferRequest};
    use crate::store::EntryStore;
    use std::fs;
    use std::path::Path;

    struct NoMedia;

    impl Extractors for NoMedia {
        fn probe(&self, _: &Path) -> Result<MediaProbe> {
            Ok(MediaProbe::default())
        }

        fn exif(&self, _: &Path) -> Result<ExifTags> {
            Ok(ExifTags::new())
        }
    }

    struct NoTransfer;

    impl Transfer for NoTransfer {
        fn run(&self, _: &TransferRequest) -> Result<TransferOutcome> {
            panic!("filesystem sources never transfer");
        }
    }

    #[test]
    fn replaces_entries_on_every_run() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("notes");
        fs::create_dir_all(tree.join("drafts")).unwrap();
        fs::write(tree.join(".timelineinclude"), "*.txt\n").unwrap();
        fs::write(tree.join("a.txt"), "first").unwrap();
        fs::write(tree.join("drafts/b.md"), "not included").unwrap();

        let config = Config::with_root(dir.path());
        let mut store = EntryStore::open_in_memory().unwrap();
        let source = FilesystemSource {
            key: "notes".into(),
            path: tree.clone(),
            date_from: None,
            date_until: None,
        };

        let mut ctx = Context {
            config: &config,
            store: &mut store,
            extractors: &NoMedia,
            transfer: &NoTransfer,
        };
        assert_eq!(source.process(&mut ctx, false).unwrap(), (1, 0));

        fs::write(tree.join("c.txt"), "second").unwrap();
        assert_eq!(source.process(&mut ctx, false).unwrap(), (2, 0));

        let titles: Vec<_> = store
            .entries_for_source("filesystem/notes")
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles.len(), 2);
        assert!(titles.contains(&"a.txt".to_string()));
        assert!(titles.contains(&"c.txt".to_string()));
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        let mut store = EntryStore::open_in_memory().unwrap();
        let source = FilesystemSource {
            key: "gone".into(),
            path: dir.path().join("nope"),
            date_from: None,
            date_until: None,
        };
        let mut ctx = Context {
            config: &config,
            store: &mut store,
            extractors: &NoMedia,
            transfer: &NoTransfer,
        };
        assert!(matches!(source.process(&mut ctx, false), Err(Error::File { .. })));
    }
}
