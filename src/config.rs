//! Runtime configuration.
//!
//! Loaded once from a TOML file (default `~/.config/lifelog/config.toml`),
//! validated, and then passed by reference to everything that needs it. There
//! is no global settings state.
//!
//! ```toml
//! backups_root = "/srv/backups"
//! database = "/srv/lifelog.db"
//! transfer_timeout = "2m"
//! transfer_deadline = "6h"
//!
//! [[sources]]
//! type = "rsync"
//! key = "laptop"
//! user = "me"
//! host = "laptop.local"
//! path = "/home/me"
//! max_backups = 5
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::platform;
use crate::source::Source;

pub const DEFAULT_TIMELINE_INCLUDE_FILE: &str = ".timelineinclude";
pub const DEFAULT_TRANSFER_IGNORE_FILE: &str = ".rsyncignore";
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_PLAINTEXT_PREVIEW_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Snapshots live under `{backups_root}/{source_type}/{key}/`
    pub backups_root: PathBuf,
    pub database: PathBuf,
    /// Preview artifacts are keyed by checksum below this directory
    pub previews_root: PathBuf,
    /// rsync I/O timeout: abort when no data moves for this long
    pub transfer_timeout: Duration,
    /// Wall-clock limit for one transfer, unbounded when unset
    pub transfer_deadline: Option<Duration>,
    pub timeline_include_file: String,
    pub transfer_ignore_file: String,
    /// Byte cap for the description of text file entries
    pub max_plaintext_preview_size: usize,
    pub sources: Vec<Source>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    backups_root: Option<PathBuf>,
    database: Option<PathBuf>,
    previews_root: Option<PathBuf>,
    transfer_timeout: Option<String>,
    transfer_deadline: Option<String>,
    timeline_include_file: Option<String>,
    transfer_ignore_file: Option<String>,
    max_plaintext_preview_size: Option<usize>,
    #[serde(default)]
    sources: Vec<Source>,
}

impl Config {
    /// Load the config file at `path`, or the default location when `None`.
    /// A missing default file yields a config without sources.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (platform::default_config_path()?, false),
        };

        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => String::new(),
            Err(e) => return Err(Error::file(path, e)),
        };

        let data_dir = platform::data_dir()?;
        Self::from_toml(&contents, &data_dir)
    }

    /// Parse a config, filling unset paths relative to `data_dir`.
    pub fn from_toml(contents: &str, data_dir: &Path) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;

        let transfer_timeout = match file.transfer_timeout {
            Some(s) => humantime::parse_duration(&s)
                .map_err(|e| Error::Config(format!("invalid transfer_timeout '{s}': {e}")))?,
            None => DEFAULT_TRANSFER_TIMEOUT,
        };
        let transfer_deadline = file
            .transfer_deadline
            .map(|s| {
                humantime::parse_duration(&s)
                    .map_err(|e| Error::Config(format!("invalid transfer_deadline '{s}': {e}")))
            })
            .transpose()?;

        let config = Config {
            backups_root: file.backups_root.unwrap_or_else(|| data_dir.join("backups")),
            database: file.database.unwrap_or_else(|| data_dir.join("lifelog.db")),
            previews_root: file.previews_root.unwrap_or_else(|| data_dir.join("previews")),
            transfer_timeout,
            transfer_deadline,
            timeline_include_file: file
                .timeline_include_file
                .unwrap_or_else(|| DEFAULT_TIMELINE_INCLUDE_FILE.to_string()),
            transfer_ignore_file: file
                .transfer_ignore_file
                .unwrap_or_else(|| DEFAULT_TRANSFER_IGNORE_FILE.to_string()),
            max_plaintext_preview_size: file
                .max_plaintext_preview_size
                .unwrap_or(DEFAULT_MAX_PLAINTEXT_PREVIEW_SIZE),
            sources: file.sources,
        };

        config.validate()?;
        Ok(config)
    }

    /// Config with every path under `root` and no sources.
    pub fn with_root(root: &Path) -> Self {
        Config {
            backups_root: root.join("backups"),
            database: root.join("lifelog.db"),
            previews_root: root.join("previews"),
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            transfer_deadline: None,
            timeline_include_file: DEFAULT_TIMELINE_INCLUDE_FILE.to_string(),
            transfer_ignore_file: DEFAULT_TRANSFER_IGNORE_FILE.to_string(),
            max_plaintext_preview_size: DEFAULT_MAX_PLAINTEXT_PREVIEW_SIZE,
            sources: Vec::new(),
        }
    }

    pub fn source(&self, key: &str) -> Result<&Source> {
        self.sources
            .iter()
            .find(|s| s.key() == key)
            .ok_or_else(|| Error::UnknownSource(key.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.transfer_timeout.is_zero() {
            return Err(Error::Config("transfer_timeout must be greater than zero".into()));
        }
        if self.transfer_deadline.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config("transfer_deadline must be greater than zero".into()));
        }
        if self.timeline_include_file.is_empty() || self.timeline_include_file.contains('/') {
            return Err(Error::Config(format!(
                "timeline_include_file must be a plain file name, got '{}'",
                self.timeline_include_file
            )));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.key()) {
                return Err(Error::Config(format!("duplicate source key '{}'", source.key())));
            }
        }

        Ok(())
    }
}
