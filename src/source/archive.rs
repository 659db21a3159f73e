use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::info;

use super::{date_range_tasks, Context, EntrySource, Task};
use crate::entry::Entry;
use crate::error::{Error, Result};

/// A JSON array of entries, in the format `lifelog export` writes. Every
/// entry is re-stamped with this source's provenance on import.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonArchive {
    pub key: String,
    pub path: PathBuf,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_until: Option<NaiveDate>,
}

impl JsonArchive {
    /// Parse the archive. Each call reads the file again, so the iterator
    /// always reflects the archive as it is now.
    pub fn extract_entries(&self) -> Result<impl Iterator<Item = Result<Entry>>> {
        let file = File::open(&self.path).map_err(|e| Error::file(&self.path, e))?;
        let entries: Vec<Entry> = serde_json::from_reader(BufReader::new(file))?;
        let provenance = self.provenance();

        Ok(entries.into_iter().map(move |mut entry| {
            entry.id = None;
            entry.source = provenance.clone();
            entry.validate()?;
            Ok(entry)
        }))
    }

    fn modified(&self) -> Result<DateTime<Utc>> {
        let meta = fs::metadata(&self.path).map_err(|e| Error::file(&self.path, e))?;
        let modified = meta.modified().map_err(|e| Error::file(&self.path, e))?;
        Ok(modified.into())
    }
}

impl EntrySource for JsonArchive {
    fn source_type(&self) -> &'static str {
        "json"
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn process(&self, ctx: &mut Context, force: bool) -> Result<(usize, usize)> {
        let provenance = self.provenance();
        let modified = self.modified()?;

        if !force {
            if let Some(processed_at) = ctx.store.archive_processed_at(&provenance)? {
                // processing times are stored with whole seconds
                if modified.timestamp() <= processed_at.timestamp() {
                    info!(source = %provenance, %processed_at, "archive unchanged since last run, skipping");
                    return Ok((0, 0));
                }
            }
        }

        let entries = self.extract_entries()?.collect::<Result<Vec<_>>>()?;
        let created = ctx.store.replace_archive_entries(&provenance, &entries, Utc::now())?;
        info!(source = %provenance, entries = created, "imported archive");
        Ok((created, 0))
    }

    fn postprocessing_tasks(&self) -> Vec<Task> {
        date_range_tasks(self.date_from, self.date_until)
    }
}
