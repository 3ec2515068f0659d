//! Append-only attendance ledger with per-session duplicate suppression.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One `(name, date)` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    Skipped,
}

/// Ledger handle for one recognition session.
///
/// The logged-name set lives only as long as this handle; opening the same
/// file again starts a new session.
pub struct AttendanceLedger {
    path: PathBuf,
    logged: HashSet<String>,
}

impl AttendanceLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self {
            path,
            logged: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_logged(&self, name: &str) -> bool {
        self.logged.contains(name)
    }

    /// Names logged so far in this session.
    pub fn logged_count(&self) -> usize {
        self.logged.len()
    }

    /// Append `(name, date)` unless `name` was already logged this session.
    ///
    /// The row is serialized in memory and appended with a single write, so
    /// a reader never sees half a row.
    pub fn record_if_absent(&mut self, name: &str, date: NaiveDate) -> Result<RecordOutcome, LedgerError> {
        if self.logged.contains(name) {
            return Ok(RecordOutcome::Skipped);
        }

        let mut row = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        row.serialize(AttendanceRecord {
            name: name.to_string(),
            date,
        })?;
        let bytes = row
            .into_inner()
            .map_err(|e| LedgerError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;

        self.logged.insert(name.to_string());
        tracing::info!(name, %date, "attendance logged");
        Ok(RecordOutcome::Recorded)
    }

    /// Read every row in the ledger at `path`. A missing file is an empty ledger.
    pub fn read_all(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<Result<Vec<AttendanceRecord>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_name_twice_writes_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut ledger = AttendanceLedger::open(&path).unwrap();

        assert_eq!(ledger.record_if_absent("Alice", date("2024-01-01")).unwrap(), RecordOutcome::Recorded);
        assert_eq!(ledger.record_if_absent("Alice", date("2024-01-01")).unwrap(), RecordOutcome::Skipped);

        let rows = AttendanceLedger::read_all(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "Alice,2024-01-01\n");
    }

    #[test]
    fn test_two_names_write_two_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut ledger = AttendanceLedger::open(&path).unwrap();

        ledger.record_if_absent("Alice", date("2024-01-01")).unwrap();
        ledger.record_if_absent("Bob", date("2024-01-01")).unwrap();

        let rows = AttendanceLedger::read_all(&path).unwrap();
        assert_eq!(
            rows,
            vec![
                AttendanceRecord { name: "Alice".into(), date: date("2024-01-01") },
                AttendanceRecord { name: "Bob".into(), date: date("2024-01-01") },
            ]
        );
        assert_eq!(ledger.logged_count(), 2);
    }

    #[test]
    fn test_dedup_is_session_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");

        let mut first = AttendanceLedger::open(&path).unwrap();
        first.record_if_absent("Alice", date("2024-01-01")).unwrap();
        drop(first);

        let mut second = AttendanceLedger::open(&path).unwrap();
        assert!(!second.is_logged("Alice"));
        assert_eq!(second.record_if_absent("Alice", date("2024-01-02")).unwrap(), RecordOutcome::Recorded);

        assert_eq!(AttendanceLedger::read_all(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/attendance.csv");
        let mut ledger = AttendanceLedger::open(&path).unwrap();
        ledger.record_if_absent("Carol", date("2025-03-04")).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_read_missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AttendanceLedger::read_all(&dir.path().join("none.csv")).unwrap().is_empty());
    }
}
