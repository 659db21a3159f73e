//! Fakes for driving whole sources without rsync or ffprobe.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use lifelog::config::Config;
use lifelog::extract::{self, ExifTags, Extractors, MediaProbe};
use lifelog::snapshot::{Transfer, TransferOutcome, TransferRequest};
use lifelog::source::{Context, EntrySource, RsyncSource};
use lifelog::store::EntryStore;
use lifelog::Result;
use walkdir::WalkDir;

/// A local stand-in for rsync: mirrors the origin directory into the
/// destination and writes an itemized change log the way rsync does.
/// Changed files are replaced (temp file + rename), never written in place,
/// so hard links into older snapshots keep their old content.
#[derive(Default)]
pub struct MirrorTransfer {
    pub runs: Cell<usize>,
}

impl Transfer for MirrorTransfer {
    fn run(&self, request: &TransferRequest) -> Result<TransferOutcome> {
        self.runs.set(self.runs.get() + 1);
        let log = mirror(Path::new(&request.origin.path), &request.destination);
        fs::write(&request.log, log).unwrap();
        Ok(TransferOutcome::Completed)
    }
}

fn relative_paths(root: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().path().strip_prefix(root).unwrap().to_path_buf())
        .collect()
}

fn mirror(origin: &Path, destination: &Path) -> String {
    let mut log = String::new();

    for rel in relative_paths(origin) {
        let from = origin.join(&rel);
        let to = destination.join(&rel);

        if from.is_dir() {
            if !to.exists() {
                fs::create_dir_all(&to).unwrap();
                log.push_str(&format!("cd+++++++++ {}/\n", rel.display()));
            }
            continue;
        }

        let content = fs::read(&from).unwrap();
        if !to.exists() {
            fs::write(&to, &content).unwrap();
            log.push_str(&format!(">f+++++++++ {}\n", rel.display()));
        } else {
            let previous = fs::read(&to).unwrap();
            if previous == content {
                continue;
            }
            let tmp = to.with_file_name(".mirror.tmp");
            fs::write(&tmp, &content).unwrap();
            fs::rename(&tmp, &to).unwrap();
            // rsync without --checksum never sets 'c' on regular files
            let code = if previous.len() == content.len() { ">f..t......" } else { ">f.st......" };
            log.push_str(&format!("{code} {}\n", rel.display()));
        }
    }

    // deepest first so directories are empty by the time they are removed
    for rel in relative_paths(destination).into_iter().rev() {
        if origin.join(&rel).exists() {
            continue;
        }
        let path = destination.join(&rel);
        if path.is_dir() {
            fs::remove_dir_all(&path).unwrap();
            log.push_str(&format!("*deleting   {}/\n", rel.display()));
        } else if path.exists() {
            fs::remove_file(&path).unwrap();
            log.push_str(&format!("*deleting   {}\n", rel.display()));
        }
    }

    log
}

/// Canned probe and exif results, counting every call
#[derive(Default)]
pub struct CountingExtractors {
    pub probe: MediaProbe,
    pub exif: ExifTags,
    pub checksums: Cell<usize>,
    pub probes: Cell<usize>,
    pub exifs: Cell<usize>,
}

impl Extractors for CountingExtractors {
    fn checksum(&self, path: &Path) -> Result<String> {
        self.checksums.set(self.checksums.get() + 1);
        extract::checksum::file_checksum(path)
    }

    fn probe(&self, _path: &Path) -> Result<MediaProbe> {
        self.probes.set(self.probes.get() + 1);
        Ok(self.probe.clone())
    }

    fn exif(&self, _path: &Path) -> Result<ExifTags> {
        self.exifs.set(self.exifs.get() + 1);
        Ok(self.exif.clone())
    }
}

/// A workspace with an origin tree to back up and a data directory
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub store: EntryStore,
    pub transfer: MirrorTransfer,
    pub extractors: CountingExtractors,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("origin")).unwrap();
        let config = Config::with_root(&dir.path().join("data"));
        Harness {
            dir,
            config,
            store: EntryStore::open_in_memory().unwrap(),
            transfer: MirrorTransfer::default(),
            extractors: CountingExtractors::default(),
        }
    }

    pub fn origin(&self) -> PathBuf {
        self.dir.path().join("origin")
    }

    /// Write a file below the origin, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.origin().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.origin().join(rel)).unwrap();
    }

    pub fn rsync_source(&self, max_backups: Option<usize>) -> RsyncSource {
        RsyncSource {
            key: "laptop".into(),
            user: None,
            host: None,
            port: 22,
            path: self.origin().display().to_string(),
            max_backups,
            date_from: None,
            date_until: None,
        }
    }

    pub fn process(&mut self, source: &dyn EntrySource, force: bool) -> (usize, usize) {
        let mut ctx = Context {
            config: &self.config,
            store: &mut self.store,
            extractors: &self.extractors,
            transfer: &self.transfer,
        };
        source.process(&mut ctx, force).unwrap()
    }

    /// Titles of the entries stored for one backup date, sorted
    pub fn titles_for_backup(&self, backup_date: &str) -> Vec<String> {
        let mut titles: Vec<_> = self
            .store
            .entries_for_backup("rsync/laptop", backup_date)
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        titles.sort();
        titles
    }
}
