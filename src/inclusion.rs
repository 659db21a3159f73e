//! Which backed-up files become timeline entries.
//!
//! Users drop a marker file (`.timelineinclude` by default) into any directory
//! of the backed-up tree. Each non-blank line is a glob relative to the
//! marker's directory. The union of all markers in a snapshot is the filter;
//! without any marker nothing is included.

use std::fs;
use std::path::{Component, Path};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct InclusionFilter {
    marker: String,
    patterns: Vec<String>,
    globs: GlobSet,
}

impl InclusionFilter {
    /// Collect rules from every marker file below `root`.
    pub fn from_tree(root: &Path, marker: &str) -> Result<Self> {
        let mut patterns = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                Error::file(path, e.into())
            })?;
            if !entry.file_type().is_file() || entry.file_name() != marker {
                continue;
            }

            let base = entry
                .path()
                .parent()
                .and_then(|dir| dir.strip_prefix(root).ok())
                .unwrap_or(Path::new(""));
            let contents = fs::read_to_string(entry.path()).map_err(|e| Error::file(entry.path(), e))?;

            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match join_pattern(base, line) {
                    Some(pattern) => patterns.push(pattern),
                    None => warn!(marker = %entry.path().display(), line, "pattern escapes the backup root"),
                }
            }
        }

        let filter = Self::from_patterns(marker, patterns);
        if filter.is_empty() {
            warn!(root = %root.display(), marker, "no inclusion rules found, nothing will be added to the timeline");
        } else {
            debug!(root = %root.display(), rules = filter.patterns.len(), "loaded inclusion rules");
        }
        Ok(filter)
    }

    /// Build from patterns already relative to the tree root. Patterns that
    /// fail to compile are logged and dropped.
    pub fn from_patterns<I, S>(marker: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();

        for pattern in patterns {
            let pattern = pattern.into();
            match GlobBuilder::new(&pattern).literal_separator(false).build() {
                Ok(glob) => {
                    builder.add(glob);
                    kept.push(pattern);
                }
                Err(e) => warn!(pattern = %pattern, error = %e, "skipping invalid inclusion pattern"),
            }
        }

        let globs = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "could not compile inclusion rules");
            kept.clear();
            GlobSet::empty()
        });

        InclusionFilter {
            marker: marker.to_string(),
            patterns: kept,
            globs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `relative` is the path below a snapshot's `files/` root. Marker files
    /// themselves are never included.
    pub fn is_included(&self, relative: &Path) -> bool {
        if relative.file_name().is_some_and(|name| name == self.marker.as_str()) {
            return false;
        }
        self.globs.is_match(relative)
    }

    /// True when any of `paths` is a marker file
    pub fn names_marker<'a, I>(&self, paths: I) -> bool
    where
        I: IntoIterator<Item = &'a Path>,
    {
        paths
            .into_iter()
            .any(|p| p.file_name().is_some_and(|name| name == self.marker.as_str()))
    }
}

/// `base/line` with `.` and `..` resolved. `None` when `..` climbs above the
/// root.
fn join_pattern(base: &Path, line: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    for component in base.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_string_lossy().into_owned());
        }
    }

    for part in line.trim_start_matches('/').split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other.to_string()),
        }
    }

    (!parts.is_empty()).then(|| parts.join("/"))
}
