//! Error types for the call journal.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal file could not be opened or written.
    #[error("{}: {}", path.display(), source)]
    Io {
        /// The journal file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A journal row could not be read as CSV.
    #[error("{}: {}", path.display(), source)]
    Csv {
        /// The journal file.
        path: PathBuf,
        /// The underlying CSV error.
        source: csv::Error,
    },

    /// A journal row had the wrong number of columns.
    #[error("{}: expected 6 fields but got {found}: {row}", path.display())]
    FieldCount {
        /// The journal file.
        path: PathBuf,
        /// The column count actually seen.
        found: usize,
        /// The offending row, comma-joined.
        row: String,
    },

    /// A journal row carried an unparseable timestamp.
    #[error("{}: invalid timestamp {value:?}: {source}", path.display())]
    Timestamp {
        /// The journal file.
        path: PathBuf,
        /// The timestamp text that failed to parse.
        value: String,
        /// The underlying parse error.
        source: chrono::ParseError,
    },
}
