//! SQLite entry store.
//!
//! One `entries` table holds every timeline entry. Besides the columns needed
//! to filter (source, schema, date, backup date) the typed attributes are kept
//! as a json document.
//!
//! Every multi-row mutation runs in a transaction:
//! - replacing the entries of one backup (delete + bulk insert)
//! - purging a backup (delete entries, then remove its directory, then commit)
//! - cascading the deletion of a source

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::entry::{self, Attributes, Entry};
use crate::error::{Error, Result};

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            schema TEXT NOT NULL,
            source TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            date_on_timeline TEXT NOT NULL,
            backup_date TEXT,
            attributes TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_source_backup ON entries(source, backup_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_archives (
            source TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// Database handle. Open once per command, reuse across all operations.
pub struct EntryStore {
    conn: Connection,
}

impl EntryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(EntryStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(EntryStore { conn })
    }

    pub fn insert_entries(&mut self, entries: &[Entry]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let inserted = insert_all(&tx, entries)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Full replace of the entries derived from one backup of `source`.
    pub fn replace_backup_entries(
        &mut self,
        source: &str,
        backup_date: &str,
        entries: &[Entry],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM entries WHERE source = ?1 AND backup_date = ?2",
            params![source, backup_date],
        )?;
        let inserted = insert_all(&tx, entries)?;
        tx.commit()?;

        debug!(source, backup_date, deleted, inserted, "replaced backup entries");
        Ok(inserted)
    }

    /// Full replace of every entry of `source`.
    pub fn replace_source_entries(&mut self, source: &str, entries: &[Entry]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM entries WHERE source = ?1", params![source])?;
        let inserted = insert_all(&tx, entries)?;
        tx.commit()?;

        debug!(source, deleted, inserted, "replaced source entries");
        Ok(inserted)
    }

    /// Delete the entries of one backup, then run `remove_files` before
    /// committing. If `remove_files` fails the entries stay.
    pub fn delete_backup_with<F>(&mut self, source: &str, backup_date: &str, remove_files: F) -> Result<usize>
    where
        F: FnOnce() -> Result<()>,
    {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM entries WHERE source = ?1 AND backup_date = ?2",
            params![source, backup_date],
        )?;
        remove_files()?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Cascade for a deleted source. Only touches the store.
    pub fn delete_source_entries(&mut self, source: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM entries WHERE source = ?1", params![source])?;
        tx.execute("DELETE FROM processed_archives WHERE source = ?1", params![source])?;
        tx.commit()?;

        info!(source, deleted, "deleted existing entries");
        Ok(deleted)
    }

    /// Keep only entries with `from <= date_on_timeline <= until`.
    pub fn delete_outside_date_range(
        &mut self,
        source: &str,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        if let Some(from) = from {
            deleted += tx.execute(
                "DELETE FROM entries WHERE source = ?1 AND date_on_timeline < ?2",
                params![source, entry::format_date(&from)],
            )?;
        }
        if let Some(until) = until {
            deleted += tx.execute(
                "DELETE FROM entries WHERE source = ?1 AND date_on_timeline > ?2",
                params![source, entry::format_date(&until)],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn entries_for_source(&self, source: &str) -> Result<Vec<Entry>> {
        self.query_entries(
            "SELECT id, schema, source, title, description, date_on_timeline, attributes
             FROM entries WHERE source = ?1 ORDER BY date_on_timeline, id",
            params![source],
        )
    }

    pub fn entries_for_backup(&self, source: &str, backup_date: &str) -> Result<Vec<Entry>> {
        self.query_entries(
            "SELECT id, schema, source, title, description, date_on_timeline, attributes
             FROM entries WHERE source = ?1 AND backup_date = ?2 ORDER BY date_on_timeline, id",
            params![source, backup_date],
        )
    }

    pub fn all_entries(&self) -> Result<Vec<Entry>> {
        self.query_entries(
            "SELECT id, schema, source, title, description, date_on_timeline, attributes
             FROM entries ORDER BY date_on_timeline, id",
            [],
        )
    }

    pub fn count_for_source(&self, source: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE source = ?1",
            params![source],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// File entries whose file is still on disk. Entries whose file vanished
    /// (usually because its snapshot was purged) are deleted on the way.
    pub fn live_file_entries(&mut self, source: &str) -> Result<Vec<Entry>> {
        let (live, orphaned): (Vec<Entry>, Vec<Entry>) = self
            .entries_for_source(source)?
            .into_iter()
            .filter(|e| e.file().is_some())
            .partition(|e| e.file().map(|f| f.file.path.exists()).unwrap_or(false));

        if !orphaned.is_empty() {
            let tx = self.conn.transaction()?;
            for entry in &orphaned {
                if let Some(id) = entry.id {
                    tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
                }
            }
            tx.commit()?;
            info!(source, deleted = orphaned.len(), "deleted entries whose file no longer exists");
        }

        Ok(live)
    }

    pub fn archive_processed_at(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT processed_at FROM processed_archives WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().and_then(entry::parse_date))
    }

    /// Replace the entries of an archive and record when it was processed, in
    /// one transaction.
    pub fn replace_archive_entries(
        &mut self,
        source: &str,
        entries: &[Entry],
        processed_at: DateTime<Utc>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE source = ?1", params![source])?;
        let inserted = insert_all(&tx, entries)?;
        tx.execute(
            "INSERT INTO processed_archives (source, processed_at) VALUES (?1, ?2)
             ON CONFLICT(source) DO UPDATE SET processed_at = excluded.processed_at",
            params![source, entry::format_date(&processed_at)],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let entries = stmt
            .query_map(params, entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn insert_all(tx: &Transaction, entries: &[Entry]) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO entries (schema, source, title, description, date_on_timeline, backup_date, attributes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for entry in entries {
        entry.validate()?;
        let attributes = serde_json::to_string(&entry.attributes)?;
        stmt.execute(params![
            entry.schema,
            entry.source,
            entry.title,
            entry.description,
            entry::format_date(&entry.date_on_timeline),
            entry.backup_date(),
            attributes,
        ])?;
    }

    Ok(entries.len())
}

fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let date_raw: String = row.get(5)?;
    let date_on_timeline = entry::parse_date(&date_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("invalid date '{date_raw}'").into(),
        )
    })?;

    let attributes_raw: String = row.get(6)?;
    let attributes: Attributes = serde_json::from_str(&attributes_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Entry {
        id: row.get(0)?,
        schema: row.get(1)?,
        source: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        date_on_timeline,
        attributes,
    })
}
