//! Syslog to structured log-entry conversion
//!
//! Decodes a single RFC 5424 record and maps it to a [`LogEntry`] with a
//! backend severity and a fixed five-key payload.
//!
//! # Architecture
//!
//! - `rfc5424.rs`: wire-format decoder/encoder
//! - `model.rs`: target entry, severity and error types
//! - `traits.rs`: the `Converter` seam and the RFC 5424 mapping

pub mod traits;
pub mod model;
pub mod rfc5424;
mod serde_utils;

// Re-export commonly used types
pub use traits::{convert, Converter, Rfc5424Converter};
pub use model::{LogEntry, ParseError, Severity, PAYLOAD_KEYS};
pub use rfc5424::{Priority, SyslogMessage, SyslogSeverity};
