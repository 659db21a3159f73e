mod common;

use std::fs;

use common::Harness;
use lifelog::derive::{derive_snapshot, ChecksumCache, Deriver, FileSelection};
use lifelog::entry::{Entry, MediaAttributes};
use lifelog::extract::{ExifValue, MediaProbe, ProbeStream, StreamKind};
use lifelog::inclusion::InclusionFilter;
use lifelog::report;
use lifelog::snapshot::Snapshot;
use lifelog::source::{EntrySource, JsonArchive, RsyncSource};

fn snapshots(h: &Harness, source: &RsyncSource) -> Vec<Snapshot> {
    source.snapshots(&h.config.backups_root).list().unwrap()
}

#[test]
fn unchanged_origin_creates_no_snapshot() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "hello");
    let source = h.rsync_source(None);

    assert_eq!(h.process(&source, false), (1, 0));
    assert_eq!(h.process(&source, false), (0, 0));

    let all = snapshots(&h, &source);
    assert_eq!(all.len(), 1);
    assert_eq!(h.transfer.runs.get(), 2);
    assert_eq!(source.snapshots(&h.config.backups_root).latest().unwrap(), Some(all[0].clone()));
    assert_eq!(h.store.count_for_source("rsync/laptop").unwrap(), 1);
}

#[test]
fn unchanged_files_are_hard_links_into_the_previous_snapshot() {
    use std::os::unix::fs::MetadataExt;

    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "stays");
    h.write("b.txt", "before");
    let source = h.rsync_source(None);
    h.process(&source, false);

    h.write("b.txt", "after");
    h.process(&source, false);

    let all = snapshots(&h, &source);
    let inode = |s: &Snapshot, name: &str| fs::metadata(s.files_path().join(name)).unwrap().ino();
    assert_eq!(inode(&all[0], "a.txt"), inode(&all[1], "a.txt"));
    assert_ne!(inode(&all[0], "b.txt"), inode(&all[1], "b.txt"));
    assert_eq!(fs::read_to_string(all[0].files_path().join("b.txt")).unwrap(), "before");
    assert_eq!(h.titles_for_backup(&all[1].backup_date()), vec!["b.txt"]);
}

#[test]
fn retention_purges_snapshots_and_their_entries() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    let source = h.rsync_source(Some(2));
    h.process(&source, false);
    let first = snapshots(&h, &source)[0].clone();

    h.write("b.txt", "b");
    h.process(&source, false);
    h.write("c.txt", "c");
    h.process(&source, false);

    let retained = snapshots(&h, &source);
    assert_eq!(retained.len(), 2);
    assert!(!first.root().exists());
    assert!(h.titles_for_backup(&first.backup_date()).is_empty());

    // the oldest retained snapshot now carries every file it holds
    assert_eq!(h.titles_for_backup(&retained[0].backup_date()), vec!["a.txt", "b.txt"]);
    assert_eq!(h.titles_for_backup(&retained[1].backup_date()), vec!["c.txt"]);
    assert_eq!(h.store.count_for_source("rsync/laptop").unwrap(), 3);
}

#[test]
fn single_retained_snapshot_holds_every_file() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    let source = h.rsync_source(Some(1));
    h.process(&source, false);

    h.write("b.txt", "b");
    h.process(&source, false);

    let retained = snapshots(&h, &source);
    assert_eq!(retained.len(), 1);
    assert_eq!(h.titles_for_backup(&retained[0].backup_date()), vec!["a.txt", "b.txt"]);
    assert_eq!(h.store.count_for_source("rsync/laptop").unwrap(), 2);
}

#[test]
fn marker_change_reprocesses_every_snapshot() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    h.write("notes/b.md", "b");
    let source = h.rsync_source(None);
    h.process(&source, false);

    h.write("c.txt", "c");
    h.process(&source, false);

    h.write(".timelineinclude", "*.txt\n*.md\n");
    assert_eq!(h.process(&source, false), (3, 0));

    let all = snapshots(&h, &source);
    assert_eq!(all.len(), 3);
    assert_eq!(h.titles_for_backup(&all[0].backup_date()), vec!["a.txt", "b.md"]);
    assert_eq!(h.titles_for_backup(&all[1].backup_date()), vec!["c.txt"]);
    assert!(h.titles_for_backup(&all[2].backup_date()).is_empty());
}

#[test]
fn extraction_runs_once_per_content() {
    let mut h = Harness::new();
    h.extractors.probe = MediaProbe {
        streams: vec![ProbeStream {
            kind: StreamKind::Video,
            width: Some(4000),
            height: Some(3000),
            duration: Some(0.04),
            codec: Some("mjpeg".into()),
            rotation: None,
            creation_time: None,
        }],
    };
    h.extractors.exif = [("Orientation".to_string(), ExifValue::Integers(vec![6]))].into_iter().collect();

    h.write(".timelineinclude", "*.jpg\n");
    h.write("photo.jpg", "jpeg bytes");
    h.write("copy.jpg", "jpeg bytes");
    let source = h.rsync_source(None);
    h.process(&source, false);

    assert_eq!(h.extractors.checksums.get(), 2);
    assert_eq!(h.extractors.probes.get(), 1);
    assert_eq!(h.extractors.exifs.get(), 1);

    let entries = h.store.entries_for_source("rsync/laptop").unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.schema, "file.image");
        // rotated a quarter turn, stored upright; probe-only fields dropped
        assert_eq!(
            entry.file().unwrap().media,
            Some(MediaAttributes {
                width: Some(3000),
                height: Some(4000),
                ..Default::default()
            })
        );
    }

    // reprocessing after a marker change reuses inode and checksum caches
    h.write(".timelineinclude", "*.jpg\n*.txt\n");
    h.write("note.txt", "hi");
    h.process(&source, false);

    assert_eq!(h.extractors.checksums.get(), 3);
    assert_eq!(h.extractors.probes.get(), 1);
    assert_eq!(h.extractors.exifs.get(), 1);
    assert_eq!(h.store.count_for_source("rsync/laptop").unwrap(), 3);
}

#[test]
fn forced_rerun_is_idempotent() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    h.write("b.txt", "b");
    let source = h.rsync_source(None);
    h.process(&source, false);
    let before = h.store.entries_for_source("rsync/laptop").unwrap();

    assert_eq!(h.process(&source, true), (2, 0));
    let after = h.store.entries_for_source("rsync/laptop").unwrap();

    assert_eq!(snapshots(&h, &source).len(), 1);
    // caches are skipped when forced
    assert_eq!(h.extractors.checksums.get(), 4);

    assert_eq!(without_ids(before), without_ids(after));
}

fn without_ids(entries: Vec<Entry>) -> Vec<Entry> {
    let mut entries: Vec<_> = entries.into_iter().map(|e| Entry { id: None, ..e }).collect();
    entries.sort_by(|a, b| a.title.cmp(&b.title));
    entries
}

#[test]
fn rederiving_an_unchanged_snapshot_is_idempotent() {
    let mut h = Harness::new();
    h.extractors.probe = MediaProbe {
        streams: vec![ProbeStream {
            kind: StreamKind::Video,
            width: Some(640),
            height: Some(480),
            duration: Some(0.04),
            codec: Some("mjpeg".into()),
            rotation: None,
            creation_time: None,
        }],
    };
    h.write(".timelineinclude", "**/*.jpg\n*.txt\n");
    h.write("2023/06/beach.jpg", "jpeg bytes");
    h.write("todo.txt", "buy milk");
    let source = h.rsync_source(None);
    h.process(&source, false);

    let before = h.store.entries_for_source("rsync/laptop").unwrap();
    let calls = (h.extractors.checksums.get(), h.extractors.probes.get(), h.extractors.exifs.get());

    let snapshot = source.snapshots(&h.config.backups_root).latest().unwrap().unwrap();
    let filter = InclusionFilter::from_tree(&snapshot.files_path(), &h.config.timeline_include_file).unwrap();
    let cache = ChecksumCache::from_entries(&before);
    let mut deriver = Deriver::new("rsync/laptop", &h.config, &h.extractors, cache);
    let written = derive_snapshot(&mut deriver, &mut h.store, &snapshot, &filter, FileSelection::All).unwrap();

    assert_eq!(written, 2);
    assert_eq!(
        (h.extractors.checksums.get(), h.extractors.probes.get(), h.extractors.exifs.get()),
        calls
    );
    let after = h.store.entries_for_source("rsync/laptop").unwrap();
    assert_eq!(without_ids(before), without_ids(after));
}

#[test]
fn deletions_alone_make_a_snapshot_without_entries() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    h.write("b.txt", "b");
    let source = h.rsync_source(None);
    h.process(&source, false);

    h.remove("b.txt");
    assert_eq!(h.process(&source, false), (0, 0));

    let all = snapshots(&h, &source);
    assert_eq!(all.len(), 2);
    assert!(!all[1].files_path().join("b.txt").exists());
    assert!(all[0].files_path().join("b.txt").exists());
    assert_eq!(h.titles_for_backup(&all[0].backup_date()), vec!["a.txt", "b.txt"]);
}

#[test]
fn same_size_edit_makes_a_new_snapshot() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "before");
    let source = h.rsync_source(None);
    h.process(&source, false);

    h.write("a.txt", "after!");
    assert_eq!(h.process(&source, false), (1, 0));

    let all = snapshots(&h, &source);
    assert_eq!(all.len(), 2);
    let log = fs::read_to_string(all[1].log_path()).unwrap();
    assert!(log.contains(">f..t...... a.txt"));

    let latest = source.snapshots(&h.config.backups_root).latest().unwrap().unwrap();
    assert_eq!(fs::read_to_string(latest.files_path().join("a.txt")).unwrap(), "after!");
    assert_eq!(fs::read_to_string(all[0].files_path().join("a.txt")).unwrap(), "before");
    assert_eq!(h.titles_for_backup(&all[1].backup_date()), vec!["a.txt"]);
}

#[test]
fn export_imports_as_json_archive() {
    let mut h = Harness::new();
    h.write(".timelineinclude", "*.txt\n");
    h.write("a.txt", "a");
    h.write("b.txt", "b");
    let source = h.rsync_source(None);
    h.process(&source, false);

    let export = h.dir.path().join("export.json");
    let entries = h.store.all_entries().unwrap();
    fs::write(&export, report::json::render(&entries).unwrap()).unwrap();

    let archive = JsonArchive {
        key: "restore".into(),
        path: export,
        date_from: None,
        date_until: None,
    };
    assert_eq!(h.process(&archive, false), (2, 0));
    assert_eq!(archive.provenance(), "json/restore");

    assert_eq!(h.store.delete_source_entries("rsync/laptop").unwrap(), 2);
    assert_eq!(h.store.count_for_source("rsync/laptop").unwrap(), 0);
    assert_eq!(h.store.count_for_source("json/restore").unwrap(), 2);
}
