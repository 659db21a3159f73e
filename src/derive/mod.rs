//! Timeline entries from backed-up files.
//!
//! For every included file:
//! 1. mimetype from the extension, then the `file.*` schema
//! 2. checksum, reused through the inode cache when possible
//! 3. metadata, reused through the checksum cache, else extracted
//! 4. timeline date: earliest of file name date, capture date and mtime
//!
//! Extraction failures abort the run for the source; they are logged with the
//! file, the source and the backup date first.

mod cache;

pub use cache::{CachedMetadata, ChecksumCache};

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::entry::{self, Attributes, Entry, FileAttributes, FileInfo, FileSchema, MediaAttributes};
use crate::error::{Error, Result};
use crate::extract::{self, dates, tags, Extractors};
use crate::inclusion::InclusionFilter;
use crate::snapshot::Snapshot;
use crate::store::EntryStore;

pub struct Deriver<'a> {
    provenance: &'a str,
    config: &'a Config,
    extractors: &'a dyn Extractors,
    cache: ChecksumCache,
}

impl<'a> Deriver<'a> {
    pub fn new(
        provenance: &'a str,
        config: &'a Config,
        extractors: &'a dyn Extractors,
        cache: ChecksumCache,
    ) -> Self {
        Deriver {
            provenance,
            config,
            extractors,
            cache,
        }
    }

    /// Entries for the files of `files` that pass `filter`. `root` is the
    /// tree the filter's patterns are relative to.
    pub fn derive_entries(
        &mut self,
        root: &Path,
        files: &[PathBuf],
        filter: &InclusionFilter,
        backup_date: &str,
    ) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        for path in files {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if !filter.is_included(relative) {
                continue;
            }

            match self.derive_file(path, backup_date) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    error!(
                        path = %path.display(),
                        source = self.provenance,
                        backup_date,
                        error = %e,
                        "could not derive entry"
                    );
                    return Err(e);
                }
            }
        }

        Ok(entries)
    }

    pub fn derive_file(&mut self, path: &Path, backup_date: &str) -> Result<Entry> {
        let meta = std::fs::metadata(path).map_err(|e| Error::file(path, e))?;
        let size = meta.len();
        let inode = meta.ino();

        let mimetype = extract::mimetype(path);
        let schema = FileSchema::from_mimetype(mimetype.as_deref());

        let checksum = match self.cache.checksum(inode, size) {
            Some(checksum) => checksum.to_string(),
            None => self.extractors.checksum(path)?,
        };

        let metadata = match self.cache.metadata(&checksum) {
            Some(cached) => cached.clone(),
            None => self.extract(path, schema, mimetype.as_deref())?,
        };
        self.cache.remember(inode, size, &checksum, &metadata);

        let creation_date = metadata.media.as_ref().and_then(|m| m.creation_date);
        let date_on_timeline = dates::earliest([
            dates::filename_date(path),
            creation_date,
            dates::modified(&meta),
        ])
        .or_else(|| entry::parse_date(backup_date))
        .unwrap_or_else(Utc::now);

        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let attributes = Attributes::File(FileAttributes {
            file: FileInfo {
                path: path.to_path_buf(),
                checksum,
                mimetype,
                size,
            },
            media: metadata.media,
            location: metadata.location,
            backup_date: Some(backup_date.to_string()),
        });

        Ok(Entry::new(schema.as_str(), self.provenance, title, date_on_timeline, attributes)?
            .with_description(metadata.description))
    }

    fn extract(&self, path: &Path, schema: FileSchema, mimetype: Option<&str>) -> Result<CachedMetadata> {
        debug!(path = %path.display(), schema = schema.as_str(), "extracting metadata");
        let mut metadata = CachedMetadata::default();

        if schema == FileSchema::Text {
            metadata.description = extract::read_description(path, self.config.max_plaintext_preview_size)?;
        }

        if schema.is_media() {
            let mut media = self.probe_media(path, schema)?;

            if schema == FileSchema::Image && mimetype.is_some_and(tags::has_exif_container) {
                let exif = tags::interpret(&self.extractors.exif(path)?);
                media.camera = exif.camera;
                if exif.creation_date.is_some() {
                    media.creation_date = exif.creation_date;
                }
                media.orientation = exif.orientation;
                metadata.location = exif.location;
            }

            // stored dimensions are already upright for quarter turns
            if schema == FileSchema::Image && matches!(media.orientation, Some(90) | Some(270)) {
                std::mem::swap(&mut media.width, &mut media.height);
                media.orientation = None;
            }

            if !media.is_empty() {
                metadata.media = Some(media);
            }
        }

        Ok(metadata)
    }

    fn probe_media(&self, path: &Path, schema: FileSchema) -> Result<MediaAttributes> {
        let probe = self.extractors.probe(path)?;
        let stream = match schema {
            FileSchema::Audio => probe.audio(),
            _ => probe.video().or_else(|| probe.audio()),
        };
        let Some(stream) = stream else {
            return Ok(MediaAttributes::default());
        };

        let mut media = MediaAttributes {
            width: stream.width,
            height: stream.height,
            duration: stream.duration.map(|d| d as u64),
            codec: stream.codec.clone(),
            creation_date: stream.creation_time,
            camera: None,
            orientation: None,
        };

        match schema {
            // JPEGs probe as one-frame MJPEG videos
            FileSchema::Image => {
                media.duration = None;
                media.codec = None;
                media.creation_date = None;
            }
            FileSchema::Video => media.orientation = stream.rotation,
            _ => {}
        }

        Ok(media)
    }
}

/// Which files of a snapshot to derive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSelection {
    /// Every file; used for the oldest retained snapshot, whose predecessor
    /// may be gone
    All,
    /// New and changed files from the change log
    Changed,
}

/// Derive the entries of one snapshot and replace the stored ones for its
/// backup date. Returns the number of entries written.
pub fn derive_snapshot(
    deriver: &mut Deriver,
    store: &mut EntryStore,
    snapshot: &Snapshot,
    filter: &InclusionFilter,
    selection: FileSelection,
) -> Result<usize> {
    let files = match selection {
        FileSelection::All => snapshot.files()?,
        FileSelection::Changed => snapshot
            .changes()?
            .into_iter()
            .filter(|c| c.has_content() && c.path.is_file())
            .map(|c| c.path)
            .collect(),
    };

    let backup_date = snapshot.backup_date();
    info!(source = deriver.provenance, snapshot = %snapshot.name(), files = files.len(), ?selection, "deriving entries");

    let entries = deriver.derive_entries(&snapshot.files_path(), &files, filter, &backup_date)?;
    store.replace_backup_entries(deriver.provenance, &backup_date, &entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExifTags, ExifValue, MediaProbe, ProbeStream, StreamKind};
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;
    use std::fs;

    /// Canned probe/exif results with call counting
    #[derive(Default)]
    struct FakeExtractors {
        probe: MediaProbe,
        exif: ExifTags,
        checksums: Cell<usize>,
        probes: Cell<usize>,
    }

    impl Extractors for FakeExtractors {
        fn checksum(&self, path: &Path) -> Result<String> {
            self.checksums.set(self.checksums.get() + 1);
            extract::checksum::file_checksum(path)
        }

        fn probe(&self, _path: &Path) -> Result<MediaProbe> {
            self.probes.set(self.probes.get() + 1);
            Ok(self.probe.clone())
        }

        fn exif(&self, _path: &Path) -> Result<ExifTags> {
            Ok(self.exif.clone())
        }
    }

    fn video_stream(codec: &str, width: u32, height: u32) -> ProbeStream {
        ProbeStream {
            kind: StreamKind::Video,
            width: Some(width),
            height: Some(height),
            duration: Some(0.04),
            codec: Some(codec.into()),
            rotation: None,
            creation_time: None,
        }
    }

    fn setup() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        (dir, config)
    }

    #[test]
    fn jpeg_keeps_dimensions_only() {
        let (dir, config) = setup();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, "jpeg bytes").unwrap();

        let fake = FakeExtractors {
            probe: MediaProbe {
                streams: vec![video_stream("mjpeg", 4000, 3000)],
            },
            ..Default::default()
        };
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        let entry = deriver.derive_file(&path, "2024-05-01T10:00:00Z").unwrap();

        assert_eq!(entry.schema, "file.image");
        assert_eq!(entry.title, "photo.jpg");
        let media = entry.file().unwrap().media.clone().unwrap();
        assert_eq!(
            media,
            MediaAttributes {
                width: Some(4000),
                height: Some(3000),
                orientation: None,
                ..Default::default()
            }
        );
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let (dir, config) = setup();
        let path = dir.path().join("portrait.jpg");
        fs::write(&path, "jpeg bytes").unwrap();

        let exif: ExifTags = [
            ("Orientation".to_string(), ExifValue::Integers(vec![6])),
            ("Make".to_string(), ExifValue::Text("Canon".into())),
            ("DateTimeOriginal".to_string(), ExifValue::Text("2001:02:03 04:05:06".into())),
        ]
        .into_iter()
        .collect();
        let fake = FakeExtractors {
            probe: MediaProbe {
                streams: vec![video_stream("mjpeg", 4000, 3000)],
            },
            exif,
            ..Default::default()
        };
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        let entry = deriver.derive_file(&path, "2024-05-01T10:00:00Z").unwrap();

        let media = entry.file().unwrap().media.clone().unwrap();
        assert_eq!((media.width, media.height), (Some(3000), Some(4000)));
        assert_eq!(media.orientation, None);
        assert_eq!(media.camera.as_deref(), Some("Canon"));
        // capture date is older than mtime
        assert_eq!(entry.date_on_timeline, Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap());
    }

    #[test]
    fn video_keeps_rotation_and_duration() {
        let (dir, config) = setup();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, "mp4 bytes").unwrap();

        let mut stream = video_stream("h264", 1920, 1080);
        stream.duration = Some(12.9);
        stream.rotation = Some(90);
        let fake = FakeExtractors {
            probe: MediaProbe { streams: vec![stream] },
            ..Default::default()
        };
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        let entry = deriver.derive_file(&path, "2024-05-01T10:00:00Z").unwrap();

        assert_eq!(entry.schema, "file.video");
        let media = entry.file().unwrap().media.clone().unwrap();
        assert_eq!(media.duration, Some(12));
        assert_eq!(media.codec.as_deref(), Some("h264"));
        assert_eq!(media.orientation, Some(90));
        assert_eq!((media.width, media.height), (Some(1920), Some(1080)));
    }

    #[test]
    fn text_description_and_file_name_date() {
        let (dir, mut config) = setup();
        config.max_plaintext_preview_size = 5;
        let path = dir.path().join("journal 2019-08-07.txt");
        fs::write(&path, "dear diary").unwrap();

        let fake = FakeExtractors::default();
        let mut deriver = Deriver::new("filesystem/notes", &config, &fake, ChecksumCache::default());
        let entry = deriver.derive_file(&path, "2024-05-01T10:00:00Z").unwrap();

        assert_eq!(entry.schema, "file.text");
        assert_eq!(entry.description, "dear ");
        assert_eq!(entry.date_on_timeline, Utc.with_ymd_and_hms(2019, 8, 7, 12, 0, 0).unwrap());
        assert_eq!(entry.backup_date(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(fake.probes.get(), 0);
    }

    #[test]
    fn hard_links_are_hashed_and_extracted_once() {
        let (dir, config) = setup();
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.mp3");
        fs::write(&first, "audio").unwrap();
        fs::hard_link(&first, &second).unwrap();

        let fake = FakeExtractors::default();
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        let a = deriver.derive_file(&first, "2024-05-01T10:00:00Z").unwrap();
        let b = deriver.derive_file(&second, "2024-05-01T10:00:00Z").unwrap();

        assert_eq!(a.file().unwrap().file.checksum, b.file().unwrap().file.checksum);
        assert_eq!(fake.checksums.get(), 1);
        assert_eq!(fake.probes.get(), 1);
    }

    #[test]
    fn copies_share_metadata_but_not_hashing() {
        let (dir, config) = setup();
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("copy.mp3");
        fs::write(&first, "audio").unwrap();
        fs::write(&second, "audio").unwrap();

        let fake = FakeExtractors::default();
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        deriver.derive_file(&first, "2024-05-01T10:00:00Z").unwrap();
        deriver.derive_file(&second, "2024-05-01T10:00:00Z").unwrap();

        assert_eq!(fake.checksums.get(), 2);
        assert_eq!(fake.probes.get(), 1);
    }

    #[test]
    fn filter_limits_derived_files() {
        let (dir, config) = setup();
        let root = dir.path().join("files");
        fs::create_dir_all(root.join("keep")).unwrap();
        fs::write(root.join("keep/a.txt"), "a").unwrap();
        fs::write(root.join("skip.txt"), "b").unwrap();
        let files = vec![root.join("keep/a.txt"), root.join("skip.txt")];

        let filter = InclusionFilter::from_patterns(".timelineinclude", ["keep/*"]);
        let fake = FakeExtractors::default();
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());
        let entries = deriver
            .derive_entries(&root, &files, &filter, "2024-05-01T10:00:00Z")
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "a.txt");
    }

    #[test]
    fn missing_file_aborts() {
        let (dir, config) = setup();
        let root = dir.path().to_path_buf();
        let filter = InclusionFilter::from_patterns(".timelineinclude", ["*"]);
        let fake = FakeExtractors::default();
        let mut deriver = Deriver::new("rsync/laptop", &config, &fake, ChecksumCache::default());

        let result = deriver.derive_entries(&root, &[root.join("ghost.txt")], &filter, "2024-05-01T10:00:00Z");
        assert!(matches!(result, Err(Error::File { .. })));
    }
}
