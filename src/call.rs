//! Call records and the in-memory call log.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::Verdict;

/// One ringing call, assembled from the modem's caller-ID traffic.
///
/// The time is stamped once, when the first RING (or stray NMBR/NAME line)
/// is seen. Name and number stay empty when the carrier delivers no
/// caller-ID data inside the assembly window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// When the call started ringing.
    pub time: DateTime<Utc>,
    /// Caller name from the NAME line, or empty.
    pub name: String,
    /// Caller number from the NMBR line, or empty.
    pub number: String,
}

impl Call {
    /// Create an empty call record stamped at `time`.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            name: String::new(),
            number: String::new(),
        }
    }
}

/// A completed, screened call as it appears in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEntry {
    /// When the call rang.
    #[serde(with = "rfc3339_nanos")]
    pub time: DateTime<Utc>,
    /// Caller name, possibly empty.
    pub name: String,
    /// Caller number, possibly empty.
    pub number: String,
    /// The action taken: `allow` or `block`.
    pub action: String,
    /// Description of the filter that decided, or empty.
    pub filter: String,
    /// Description of the matching rule, or the filter error text, or empty.
    pub rule: String,
}

impl CallEntry {
    /// Build a journal entry from a call and its verdict.
    pub fn new(call: &Call, verdict: &Verdict) -> Self {
        Self {
            time: call.time,
            name: call.name.clone(),
            number: call.number.clone(),
            action: verdict.action.to_string(),
            filter: verdict.filter.clone(),
            rule: verdict.rule.clone(),
        }
    }
}

/// Ordered, append-only list of completed calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallLog {
    /// Entries in append order.
    pub calls: Vec<CallEntry>,
}

impl CallLog {
    /// Timestamp of the most recent entry, if any.
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.calls.last().map(|c| c.time)
    }
}

/// RFC 3339 timestamps with nanosecond precision, matching the on-disk
/// journal format.
pub mod rfc3339_nanos {
    use super::*;
    use serde::{Deserializer, Serializer};

    /// Serialize as e.g. `2026-08-02T09:15:00.000000001Z`.
    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(t))
    }

    /// Accept any RFC 3339 timestamp, with or without fractional seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Format a timestamp the way journal rows are written.
    pub fn format(t: &DateTime<Utc>) -> String {
        t.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Parse a journal timestamp.
    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rfc3339_nanos_round_trip() {
        let t = Utc.with_ymd_and_hms(2026, 8, 2, 9, 15, 0).unwrap()
            + chrono::Duration::nanoseconds(1);
        let s = rfc3339_nanos::format(&t);
        assert_eq!(s, "2026-08-02T09:15:00.000000001Z");
        assert_eq!(rfc3339_nanos::parse(&s).unwrap(), t);
    }

    #[test]
    fn test_call_log_last_time() {
        let mut log = CallLog::default();
        assert!(log.last_time().is_none());

        let t = Utc::now();
        log.calls.push(CallEntry {
            time: t,
            name: "ACME".to_string(),
            number: "5551212".to_string(),
            action: "allow".to_string(),
            filter: String::new(),
            rule: String::new(),
        });
        assert_eq!(log.last_time(), Some(t));
    }

    #[test]
    fn test_call_log_json_shape() {
        let t = rfc3339_nanos::parse("2026-08-02T09:15:00.5Z").unwrap();
        let log = CallLog {
            calls: vec![CallEntry {
                time: t,
                name: "ACME".to_string(),
                number: "5551212".to_string(),
                action: "block".to_string(),
                filter: "block.csv".to_string(),
                rule: "spam".to_string(),
            }],
        };

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(
            json["calls"][0]["time"],
            "2026-08-02T09:15:00.500000000Z"
        );
        assert_eq!(json["calls"][0]["action"], "block");
        assert_eq!(json["calls"][0]["filter"], "block.csv");
        assert_eq!(json["calls"][0]["rule"], "spam");
    }
}
