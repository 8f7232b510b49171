pub use super::model::{LogEntry, ParseError, Severity};

use super::model::PAYLOAD_KEYS;
use super::rfc5424::{SyslogMessage, SyslogSeverity, Priority};

pub trait Converter: Send + Sync {
    /// convert one raw syslog record into a structured entry
    fn convert(&self, raw: &[u8]) -> Result<LogEntry, ParseError>;
}

impl<F> Converter for F
where
    F: Fn(&[u8]) -> Result<LogEntry, ParseError> + Send + Sync,
{
    fn convert(&self, raw: &[u8]) -> Result<LogEntry, ParseError> {
        self(raw)
    }
}

/// Converts RFC 5424 messages into log entries.
pub struct Rfc5424Converter;

impl Converter for Rfc5424Converter {
    fn convert(&self, raw: &[u8]) -> Result<LogEntry, ParseError> {
        convert(raw)
    }
}

/// Parse `raw` as an RFC 5424 message and map it to a [`LogEntry`].
///
/// The payload always carries `host_name`, `app_name`, `process_id`,
/// `message_id` and `message`. Only `message` is trimmed.
pub fn convert(raw: &[u8]) -> Result<LogEntry, ParseError> {
    let msg = SyslogMessage::parse(raw)?;
    Ok(LogEntry::from(msg))
}

impl From<SyslogMessage> for LogEntry {
    fn from(msg: SyslogMessage) -> Self {
        let mut entry = LogEntry::new(msg.timestamp, Severity::from(msg.priority));

        let message = String::from_utf8_lossy(&msg.message).trim().to_string();
        let values = [msg.hostname, msg.app_name, msg.proc_id, msg.msg_id, message];

        entry.payload = PAYLOAD_KEYS
            .iter()
            .map(|key| key.to_string())
            .zip(values)
            .collect();
        entry
    }
}

/// Only the raw PRI values 0..=7 (facility `kern`) carry a recognized
/// severity. Every other value, including other facilities, is `Default`.
impl From<Priority> for Severity {
    fn from(priority: Priority) -> Self {
        let code = u8::try_from(priority.0).ok();
        match code.and_then(SyslogSeverity::from_code) {
            Some(SyslogSeverity::Emergency) => Severity::Emergency,
            Some(SyslogSeverity::Alert) => Severity::Alert,
            Some(SyslogSeverity::Critical) => Severity::Critical,
            Some(SyslogSeverity::Error) => Severity::Error,
            Some(SyslogSeverity::Warning) => Severity::Warning,
            Some(SyslogSeverity::Notice) => Severity::Notice,
            Some(SyslogSeverity::Info) => Severity::Info,
            Some(SyslogSeverity::Debug) => Severity::Debug,
            None => Severity::Default,
        }
    }
}
