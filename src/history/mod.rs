//! History store — append-only CSV ledger of enriched messages.
//!
//! File layout: one header row (`date,from,subject,category,priority,summary`)
//! followed by one row per message. Rows are only ever appended; re-running a
//! batch on the same date appends duplicate rows.
//!
//! Each append rewrites the ledger into a temp file next to it and renames it
//! into place, so a concurrent reader sees either the previous file or the
//! complete new one. Writers serialize on `<ledger>.lock`.

pub mod lock;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::HistoryError;
use crate::pipeline::types::{Category, EnrichedMessage, Priority};

use self::lock::WriterLock;

/// Column order of the ledger.
pub const HEADER: [&str; 6] = ["date", "from", "subject", "category", "priority", "summary"];

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub date: NaiveDate,
    pub from: String,
    pub subject: String,
    pub category: Category,
    pub priority: Priority,
    pub summary: String,
}

impl HistoryRecord {
    /// Build a row for `message` ingested on `date`. Text fields are
    /// flattened to one line.
    pub fn from_enriched(message: &EnrichedMessage, date: NaiveDate) -> Self {
        Self {
            date,
            from: single_line(message.from()),
            subject: single_line(message.subject()),
            category: message.category,
            priority: message.priority,
            summary: single_line(&message.summary),
        }
    }
}

/// Replace line breaks with spaces and trim.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

/// Append-only CSV ledger on disk.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `items` as rows dated `as_of`. Returns the number of rows
    /// written.
    pub fn append(&self, items: &[EnrichedMessage], as_of: NaiveDate) -> Result<usize, HistoryError> {
        let records = items
            .iter()
            .map(|m| HistoryRecord::from_enriched(m, as_of))
            .collect();
        self.append_records(records)
    }

    /// Append pre-built rows. On failure the rows come back inside the
    /// error.
    pub fn append_records(&self, records: Vec<HistoryRecord>) -> Result<usize, HistoryError> {
        self.append_records_with(records, persist)
    }

    /// Append, handing the fully written temp file to `commit` to put in
    /// place.
    fn append_records_with(
        &self,
        records: Vec<HistoryRecord>,
        commit: impl FnOnce(NamedTempFile, &Path) -> io::Result<()>,
    ) -> Result<usize, HistoryError> {
        match self.write_batch(&records, commit) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    rows = records.len(),
                    "History batch appended"
                );
                Ok(records.len())
            }
            Err(e) => Err(HistoryError::WriteFailed {
                path: self.path.display().to_string(),
                reason: e.to_string(),
                unwritten: records,
            }),
        }
    }

    /// Async wrapper: runs the append on the blocking pool.
    pub async fn append_records_async(
        &self,
        records: Vec<HistoryRecord>,
    ) -> Result<usize, HistoryError> {
        let store = self.clone();
        let path = self.path.display().to_string();
        let backup = records.clone();
        match tokio::task::spawn_blocking(move || store.append_records(records)).await {
            Ok(result) => result,
            Err(e) => Err(HistoryError::WriteFailed {
                path,
                reason: format!("append task aborted: {e}"),
                unwritten: backup,
            }),
        }
    }

    fn write_batch(
        &self,
        records: &[HistoryRecord],
        commit: impl FnOnce(NamedTempFile, &Path) -> io::Result<()>,
    ) -> io::Result<()> {
        let dir = parent_dir(&self.path);
        fs::create_dir_all(&dir)?;
        let _lock = WriterLock::acquire(&lock_path(&self.path))?;

        let existing = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let fresh = existing.is_empty();

        let mut tmp = create_temp(&dir)?;
        // Keep the ledger's mode so other readers are not locked out.
        match fs::metadata(&self.path) {
            Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tmp.write_all(&existing)?;
        if !fresh && !existing.ends_with(b"\n") {
            tmp.write_all(b"\n")?;
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut tmp);
            if fresh {
                writer.write_record(HEADER)?;
            }
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        commit(tmp, &self.path)?;

        debug!(path = %self.path.display(), fresh, "History file replaced");
        Ok(())
    }

    /// Read every row. A missing or empty ledger is "no data", not an error.
    /// Malformed rows are skipped.
    pub fn load(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        load(&self.path)
    }
}

/// Read every row from the ledger at `path`.
pub fn load(path: &Path) -> Result<Vec<HistoryRecord>, HistoryError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No history file yet");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(HistoryError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<HistoryRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                row = line + 1,
                error = %e,
                "Skipping malformed history row"
            ),
        }
    }
    Ok(records)
}

/// Write `records` (with header) to `path`, replacing it atomically.
pub fn export(records: &[HistoryRecord], path: &Path) -> io::Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir)?;
    let mut tmp = create_temp(&dir)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(&mut tmp);
        writer.write_record(HEADER)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
    }
    tmp.persist(path)?;
    Ok(())
}

fn persist(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    tmp.persist(path)?;
    Ok(())
}

/// Temp file with the mode `File::create` would give (`0666` before umask).
#[cfg(unix)]
fn create_temp(dir: &Path) -> io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;

    tempfile::Builder::new()
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(dir)
}

#[cfg(not(unix))]
fn create_temp(dir: &Path) -> io::Result<NamedTempFile> {
    NamedTempFile::new_in(dir)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}
