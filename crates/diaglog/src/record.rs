//! Record model for the log store
//!
//! Defines the immutable unit of storage: a severity-classified, timestamped
//! log record with a store-assigned sequence number.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log record
///
/// Ordered from most severe to least severe: `Error < Warning < Info < Debug`.
/// A record matches a threshold when `record.level <= threshold`, so querying
/// at `Info` includes `Error`, `Warning`, and `Info` records but not `Debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Unrecoverable or unexpected failures
    Error = 1,
    /// Recoverable problems worth surfacing
    Warning = 2,
    /// Normal operational messages
    Info = 3,
    /// Verbose diagnostic detail
    Debug = 4,
}

impl Severity {
    /// Display ordinal of this severity (1 = most severe, 4 = least severe)
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Map a display ordinal back to a severity
    ///
    /// Ordinals originate from untrusted UI input (e.g. the selected index of
    /// a level picker), so out-of-range values return `None` instead of
    /// panicking.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            1 => Some(Severity::Error),
            2 => Some(Severity::Warning),
            3 => Some(Severity::Info),
            4 => Some(Severity::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Debug => write!(f, "debug"),
        }
    }
}

/// A single stored log record
///
/// Records are created only by the store's append path and never mutated
/// afterwards. Queries return copies; the store keeps exclusive ownership of
/// the stored data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Monotonically increasing sequence number, assigned at append time
    pub sequence: u64,
    /// When the record was appended (non-decreasing with sequence)
    pub timestamp: DateTime<Utc>,
    /// Severity classification
    pub level: Severity,
    /// Message text, arbitrary length
    pub message: String,
}

impl LogRecord {
    /// Create a new log record
    pub fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        level: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
        assert!(Severity::Info < Severity::Debug);
    }

    #[test]
    fn test_threshold_semantics() {
        // A threshold of Info admits everything at least as severe
        assert!(Severity::Error <= Severity::Info);
        assert!(Severity::Warning <= Severity::Info);
        assert!(Severity::Info <= Severity::Info);
        assert!(!(Severity::Debug <= Severity::Info));
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(Severity::Error.ordinal(), 1);
        assert_eq!(Severity::Warning.ordinal(), 2);
        assert_eq!(Severity::Info.ordinal(), 3);
        assert_eq!(Severity::Debug.ordinal(), 4);
    }

    #[test]
    fn test_from_ordinal_is_total() {
        assert_eq!(Severity::from_ordinal(1), Some(Severity::Error));
        assert_eq!(Severity::from_ordinal(2), Some(Severity::Warning));
        assert_eq!(Severity::from_ordinal(3), Some(Severity::Info));
        assert_eq!(Severity::from_ordinal(4), Some(Severity::Debug));

        // UI indices are untrusted; anything out of range maps to None
        assert_eq!(Severity::from_ordinal(0), None);
        assert_eq!(Severity::from_ordinal(5), None);
        assert_eq!(Severity::from_ordinal(255), None);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Error.to_string(), "error");
        assert_eq!(Severity::Debug.to_string(), "debug");
    }

    #[test]
    fn test_record_construction() {
        let ts = Utc::now();
        let record = LogRecord::new(7, ts, Severity::Warning, "slow response");

        assert_eq!(record.sequence, 7);
        assert_eq!(record.timestamp, ts);
        assert_eq!(record.level, Severity::Warning);
        assert_eq!(record.message, "slow response");
    }
}
