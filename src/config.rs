//! Serial connect-string parsing.
//!
//! The daemon is pointed at its modem with a five-field connect string in
//! the traditional `port,baud,handshake,data-bits,stop-bits` form, e.g.
//! `/dev/ttyACM0,19200,n,8,1`. Only the port and baud fields are consumed;
//! the remaining three are accepted and ignored for compatibility with
//! existing deployments.

use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The connect string did not have exactly five comma-separated fields.
    #[error("expected 5 parameters, got {0}")]
    FieldCount(usize),

    /// The baud field was not an integer.
    #[error("invalid baud rate {value:?}: {source}")]
    Baud {
        /// The offending field text.
        value: String,
        /// The underlying parse failure.
        source: ParseIntError,
    },

    /// A pattern file could not be opened or read.
    #[error("{}: {}", path.display(), source)]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A pattern file contained a malformed CSV record.
    #[error("{}: {}", path.display(), source)]
    Csv {
        /// The file that failed.
        path: PathBuf,
        /// The underlying CSV error.
        source: csv::Error,
    },

    /// A pattern-file row had the wrong number of columns.
    #[error("{}: expected 4 fields but found {found}", path.display())]
    RuleFieldCount {
        /// The file that failed.
        path: PathBuf,
        /// The column count actually seen.
        found: usize,
    },

    /// A name or number pattern failed to compile.
    #[error("{}: invalid pattern {pattern:?}: {source}", path.display())]
    Pattern {
        /// The file that failed.
        path: PathBuf,
        /// The pattern text that failed to compile.
        pattern: String,
        /// The regex compile error.
        source: regex::Error,
    },

    /// A predicate column named something outside the closed registry.
    #[error("{}: unrecognized predicate: {name}", path.display())]
    UnknownPredicate {
        /// The file that failed.
        path: PathBuf,
        /// The unrecognized predicate name.
        name: String,
    },
}

/// Parsed serial connect string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
    /// Serial device path, e.g. `/dev/ttyACM0`.
    pub port: String,
    /// Baud rate, e.g. 19200.
    pub baud: u32,
}

impl ConnectString {
    /// Parse a `port,baud,handshake,data-bits,stop-bits` connect string.
    ///
    /// The handshake, data-bits, and stop-bits fields are validated only for
    /// presence.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 5 {
            return Err(ConfigError::FieldCount(fields.len()));
        }

        let baud = fields[1].parse().map_err(|source| ConfigError::Baud {
            value: fields[1].to_string(),
            source,
        })?;

        Ok(Self {
            port: fields[0].to_string(),
            baud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let conn = ConnectString::parse("/dev/ttyACM0,19200,n,8,1").unwrap();
        assert_eq!(conn.port, "/dev/ttyACM0");
        assert_eq!(conn.baud, 19200);
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let err = ConnectString::parse("/dev/ttyACM0,19200").unwrap_err();
        assert!(matches!(err, ConfigError::FieldCount(2)));
        assert!(ConnectString::parse("/dev/ttyACM0,19200,n,8,1,extra").is_err());
    }

    #[test]
    fn test_parse_bad_baud() {
        let err = ConnectString::parse("/dev/ttyACM0,fast,n,8,1").unwrap_err();
        assert!(err.to_string().contains("fast"));
    }
}
