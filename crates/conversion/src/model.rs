use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::serde_utils::serialize_fields_as_map;

/// Payload keys emitted for every converted message, in emission order.
pub const PAYLOAD_KEYS: [&str; 5] = ["host_name", "app_name", "process_id", "message_id", "message"];

/// Severity of a structured log entry, as understood by the logging backend.
///
/// Variants are ordered by importance. `Default` is the "unknown" level and
/// sorts below `Debug`, matching the backend's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// No severity information
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }

    /// Numeric code used by the backend (0, 100, ..., 800).
    pub fn code(&self) -> u16 {
        match self {
            Severity::Default => 0,
            Severity::Debug => 100,
            Severity::Info => 200,
            Severity::Notice => 300,
            Severity::Warning => 400,
            Severity::Error => 500,
            Severity::Critical => 600,
            Severity::Alert => 700,
            Severity::Emergency => 800,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured log entry ready to hand to a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Time the event happened. `None` lets the backend stamp its receive time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    pub severity: Severity,

    /// String key/value payload. Serialized as a JSON object.
    #[serde(serialize_with = "serialize_fields_as_map")]
    pub payload: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(timestamp: Option<DateTime<Utc>>, severity: Severity) -> Self {
        Self {
            timestamp,
            severity,
            payload: Vec::with_capacity(PAYLOAD_KEYS.len()),
        }
    }

    /// Look up a payload value by key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("truncated frame: declared {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("{0} trailing bytes after framed message")]
    TrailingData(usize),

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid structured data: {0}")]
    InvalidStructuredData(String),

    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        let ordered = [
            Severity::Default,
            Severity::Debug,
            Severity::Info,
            Severity::Notice,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
            Severity::Alert,
            Severity::Emergency,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort below {}", pair[0], pair[1]);
            assert!(pair[0].code() < pair[1].code());
        }
    }

    #[test]
    fn test_severity_serializes_as_backend_name() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, r#""CRITICAL""#);
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
    }

    #[test]
    fn test_entry_serialization_omits_missing_timestamp() {
        let mut entry = LogEntry::new(None, Severity::Info);
        entry.payload.push(("message".to_string(), "hello".to_string()));

        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert!(json.get("timestamp").is_none());
        assert_eq!(json["severity"], "INFO");
        assert_eq!(json["payload"]["message"], "hello");
    }

    #[test]
    fn test_entry_field_lookup() {
        let mut entry = LogEntry::new(None, Severity::Default);
        entry.payload.push(("host_name".to_string(), "web-1".to_string()));

        assert_eq!(entry.field("host_name"), Some("web-1"));
        assert_eq!(entry.field("app_name"), None);
    }
}
