//! Parser for rsync's `--itemize-changes` output.
//!
//! Each itemized line is an 11 character code, a space, and the path:
//!
//! ```text
//! >f+++++++++ Photos/new.jpg       received, brand new
//! >f.st...... notes.txt            received, size and time changed
//! >f..t...... same-size.txt        received, same size, new content
//! .f...p..... mode.txt             attributes only, nothing received
//! .d..t...... Photos/              directory attributes
//! *deleting   old/gone.txt
//! ```
//!
//! Everything else in the log (errors, stats) is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const CODE_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    New,
    Changed,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::New => "new",
            ChangeAction::Changed => "changed",
            ChangeAction::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Absolute path inside the snapshot's `files/` tree
    pub path: PathBuf,
    pub action: ChangeAction,
}

impl ChangeRecord {
    /// New or changed content, as opposed to a deletion
    pub fn has_content(&self) -> bool {
        self.action != ChangeAction::Deleted
    }
}

pub fn read_change_log(log: &Path, files_root: &Path) -> Result<Vec<ChangeRecord>> {
    let raw = fs::read(log).map_err(|e| Error::file(log, e))?;
    Ok(parse_change_log(&String::from_utf8_lossy(&raw), files_root))
}

pub fn parse_change_log(log: &str, files_root: &Path) -> Vec<ChangeRecord> {
    log.lines()
        .filter_map(|line| parse_line(line.trim_end_matches('\r')))
        .map(|(action, relative)| ChangeRecord {
            path: files_root.join(relative),
            action,
        })
        .collect()
}

fn parse_line(line: &str) -> Option<(ChangeAction, String)> {
    if !line.is_char_boundary(CODE_LEN) || line.as_bytes().get(CODE_LEN) != Some(&b' ') {
        return None;
    }
    let (code, rest) = line.split_at(CODE_LEN);
    let path = &rest[1..];
    // directories carry a trailing slash
    if path.is_empty() || path.ends_with('/') {
        return None;
    }

    let code = code.as_bytes();
    if code.starts_with(b"*deleting") {
        return Some((ChangeAction::Deleted, unescape(path)));
    }

    // only regular files that were received count, attribute-only updates
    // start with '.'
    if code[0] != b'>' || code[1] != b'f' {
        return None;
    }

    // without --checksum a same-size edit shows up as `>f..t......`
    let action = if code[2..].iter().all(|&c| c == b'+') {
        ChangeAction::New
    } else {
        ChangeAction::Changed
    };

    Some((action, unescape(path)))
}

/// rsync prints unprintable bytes in paths as `\#ooo` (octal).
fn unescape(path: &str) -> String {
    if !path.contains("\\#") {
        return path.to_string();
    }

    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'#') && i + 5 <= bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 2..i + 5]).ok();
            if let Some(value) = octal.and_then(|o| u8::from_str_radix(o, 8).ok()) {
                out.push(value);
                i += 5;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn count_actions(records: &[ChangeRecord]) -> (usize, usize, usize) {
    records.iter().fold((0, 0, 0), |(new, changed, deleted), r| match r.action {
        ChangeAction::New => (new + 1, changed, deleted),
        ChangeAction::Changed => (new, changed + 1, deleted),
        ChangeAction::Deleted => (new, changed, deleted + 1),
    })
}
