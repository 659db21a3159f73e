//! Plain-text tables for the terminal.

use std::fmt::Write;
use std::path::Path;

use super::SnapshotSummary;
use crate::entry::{self, Entry};
use crate::previews::PreviewTarget;
use crate::scheduler::RunSummary;
use crate::snapshot::ChangeRecord;
use crate::source::Source;
use crate::util::{format_bytes, truncate};

pub fn sources(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::from("No sources configured.\n");
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<12} {}", "KEY", "TYPE", "ORIGIN");
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for source in sources {
        let _ = writeln!(out, "{:<20} {:<12} {}", source.key(), source.source_type(), source.describe());
    }
    out
}

pub fn snapshots(summaries: &[SnapshotSummary]) -> String {
    if summaries.is_empty() {
        return String::from("No snapshots yet.\n");
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<24} {:>8} {:>10}", "SNAPSHOT", "FILES", "SIZE");
    out.push_str(&"-".repeat(44));
    out.push('\n');
    for s in summaries {
        let marker = if s.latest { "  (latest)" } else { "" };
        let _ = writeln!(out, "{:<24} {:>8} {:>10}{marker}", s.name, s.files, format_bytes(s.bytes));
    }
    out
}

/// One line per change, paths relative to the snapshot's file tree
pub fn changes(records: &[ChangeRecord], files_root: &Path) -> String {
    if records.is_empty() {
        return String::from("No changes.\n");
    }

    let mut out = String::new();
    for record in records {
        let path = record.path.strip_prefix(files_root).unwrap_or(&record.path);
        let _ = writeln!(out, "{:<8} {}", record.action.as_str(), path.display());
    }

    let (new, changed, deleted) = crate::snapshot::changelog::count_actions(records);
    let _ = writeln!(out, "\n{new} new, {changed} changed, {deleted} deleted");
    out
}

pub fn entries(entries: &[Entry]) -> String {
    if entries.is_empty() {
        return String::from("No entries.\n");
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<18} {:<40} {:>10}", "DATE", "SCHEMA", "TITLE", "SIZE");
    out.push_str(&"-".repeat(91));
    out.push('\n');
    for e in entries {
        let size = e.file().map(|f| format_bytes(f.file.size)).unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<20} {:<18} {:<40} {:>10}",
            entry::format_date(&e.date_on_timeline),
            e.schema,
            truncate(&e.title, 40),
            size
        );
    }
    let _ = writeln!(out, "\n{} entries", entries.len());
    out
}

pub fn previews(targets: &[PreviewTarget]) -> String {
    if targets.is_empty() {
        return String::from("No file entries.\n");
    }

    let mut out = String::new();
    for t in targets {
        let state = if t.generated { "ok" } else { "missing" };
        let _ = writeln!(out, "{:<8} {:<40} {}", state, truncate(&t.title, 40), t.dir.display());
    }
    let pending = targets.iter().filter(|t| !t.generated).count();
    let _ = writeln!(out, "\n{} previews, {pending} not generated", targets.len());
    out
}

pub fn summary(summary: &RunSummary, verbose: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} entries created, {} updated", summary.created, summary.updated);

    if let Some(duration_ms) = summary.duration_ms {
        let _ = writeln!(out, "completed in {:.2}s", duration_ms as f64 / 1000.0);
    }

    if verbose {
        for timing in &summary.timings {
            let _ = writeln!(
                out,
                "  {}: {:.2}s, {} created",
                timing.source,
                timing.duration_ms as f64 / 1000.0,
                timing.created
            );
        }
        if let Some(bytes) = summary.memory_after_run_bytes {
            let _ = writeln!(out, "memory after run: {}", format_bytes(bytes as u64));
        }
    }

    if !summary.failures.is_empty() {
        out.push_str("\nfailed sources:\n");
        for failure in &summary.failures {
            let _ = writeln!(out, "  {}: {}", failure.source, failure.error);
        }
    }

    out
}
