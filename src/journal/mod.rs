//! The durable call journal.
//!
//! Every screened call is appended to a six-column CSV file
//! (`time,name,number,action,filter,rule`, RFC 3339 nanosecond timestamps)
//! and mirrored in an in-memory [`CallLog`] for the HTTP surface. The file
//! is reopened append-only for each write, so external rotation between
//! calls is tolerated.
//!
//! Appends also publish a change edge: subscribers wait on
//! [`CallJournal::changed_after`], which resolves as soon as an entry newer
//! than their reference timestamp is committed - immediately, if one
//! already was.

mod error;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::call::{rfc3339_nanos, CallEntry, CallLog};

pub use error::JournalError;

/// The call journal: an append-only CSV file, its in-memory mirror, and a
/// change broadcast.
#[derive(Debug)]
pub struct CallJournal {
    path: PathBuf,
    log: RwLock<CallLog>,
    changed_tx: watch::Sender<Option<DateTime<Utc>>>,
}

impl CallJournal {
    /// Load the journal at `path`, or start empty when the file does not
    /// exist yet.
    ///
    /// Rows with the wrong column count or an unparseable timestamp reject
    /// the whole file; a journal that cannot be trusted should not be
    /// silently truncated.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let log = match std::fs::File::open(&path) {
            Ok(file) => parse_log(&path, file)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CallLog::default(),
            Err(source) => {
                return Err(JournalError::Io {
                    path,
                    source,
                })
            }
        };

        info!(path = %path.display(), entries = log.calls.len(), "call log loaded");
        let (changed_tx, _) = watch::channel(log.last_time());
        Ok(Self {
            path,
            log: RwLock::new(log),
            changed_tx,
        })
    }

    /// Append an entry.
    ///
    /// The in-memory log grows and the change broadcast fires even when the
    /// file write fails; the returned error is for reporting only and must
    /// not stop the screening pipeline.
    pub fn append(&self, entry: CallEntry) -> Result<(), JournalError> {
        let file_result = self.append_to_file(&entry);

        {
            let mut log = self.write_log();
            let time = entry.time;
            debug!(name = %entry.name, number = %entry.number, action = %entry.action, "journal append");
            log.calls.push(entry);
            // Publish under the write lease so wakeups observe entries in
            // append order.
            self.changed_tx.send_replace(Some(time));
        }

        file_result
    }

    /// A point-in-time copy of the log.
    pub fn snapshot(&self) -> CallLog {
        self.read_log().clone()
    }

    /// Timestamp of the most recent entry, if any.
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.read_log().last_time()
    }

    /// Wait until an entry newer than `after` has been committed.
    ///
    /// Entries committed before the call resolve it immediately.
    pub async fn changed_after(&self, after: DateTime<Utc>) {
        let mut rx = self.changed_tx.subscribe();
        loop {
            if let Some(last) = *rx.borrow_and_update() {
                if last > after {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                // Journal dropped; nothing further will ever arrive.
                return;
            }
        }
    }

    fn append_to_file(&self, entry: &CallEntry) -> Result<(), JournalError> {
        let io_err = |source| JournalError::Io {
            path: self.path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record([
                rfc3339_nanos::format(&entry.time).as_str(),
                entry.name.as_str(),
                entry.number.as_str(),
                entry.action.as_str(),
                entry.filter.as_str(),
                entry.rule.as_str(),
            ])
            .map_err(|source| JournalError::Csv {
                path: self.path.clone(),
                source,
            })?;
        writer
            .flush()
            .map_err(io_err)?;
        Ok(())
    }

    fn read_log(&self) -> RwLockReadGuard<'_, CallLog> {
        match self.log.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_log(&self) -> RwLockWriteGuard<'_, CallLog> {
        match self.log.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Read all six-column records from an existing journal file.
fn parse_log(path: &Path, file: std::fs::File) -> Result<CallLog, JournalError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut log = CallLog::default();
    for record in reader.records() {
        let record = record.map_err(|source| JournalError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        if record.len() != 6 {
            return Err(JournalError::FieldCount {
                path: path.to_path_buf(),
                found: record.len(),
                row: record.iter().collect::<Vec<_>>().join(","),
            });
        }

        let time = rfc3339_nanos::parse(&record[0]).map_err(|source| JournalError::Timestamp {
            path: path.to_path_buf(),
            value: record[0].to_string(),
            source,
        })?;

        log.calls.push(CallEntry {
            time,
            name: record[1].to_string(),
            number: record[2].to_string(),
            action: record[3].to_string(),
            filter: record[4].to_string(),
            rule: record[5].to_string(),
        });
    }

    Ok(log)
}
