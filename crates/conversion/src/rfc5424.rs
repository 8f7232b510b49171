//! RFC 5424 syslog message decoding and encoding.
//!
//! Accepts a single message, optionally prefixed with an octet-counting
//! frame (`MSG-LEN SP SYSLOG-MSG`, RFC 6587 §3.4.1):
//!
//! ```text
//! <PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID SP SD [SP MSG]
//! ```

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::ParseError;

/// Highest PRI value that encodes a real facility/severity pair (local7.debug).
pub const MAX_PRIORITY: u16 = 191;

const NILVALUE: &[u8] = b"-";
const BOM: &[u8] = b"\xEF\xBB\xBF";

// RFC 5424 §6 header field limits
const HOSTNAME_MAX: usize = 255;
const APP_NAME_MAX: usize = 48;
const PROCID_MAX: usize = 128;
const MSGID_MAX: usize = 32;
const SD_NAME_MAX: usize = 32;

/// Syslog severity levels (RFC 5424 §6.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyslogSeverity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl SyslogSeverity {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SyslogSeverity::Emergency),
            1 => Some(SyslogSeverity::Alert),
            2 => Some(SyslogSeverity::Critical),
            3 => Some(SyslogSeverity::Error),
            4 => Some(SyslogSeverity::Warning),
            5 => Some(SyslogSeverity::Notice),
            6 => Some(SyslogSeverity::Info),
            7 => Some(SyslogSeverity::Debug),
            _ => None,
        }
    }
}

/// Raw PRI value: `facility * 8 + severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority(pub u16);

impl Priority {
    pub fn new(facility: u8, severity: SyslogSeverity) -> Self {
        Priority(u16::from(facility) * 8 + severity as u16)
    }

    /// Severity component, or `None` when the value is outside the PRI range.
    pub fn severity(&self) -> Option<SyslogSeverity> {
        if self.0 > MAX_PRIORITY {
            return None;
        }
        SyslogSeverity::from_code((self.0 & 0x07) as u8)
    }

    /// Facility code (0..=23), or `None` when the value is outside the PRI range.
    pub fn facility(&self) -> Option<u8> {
        if self.0 > MAX_PRIORITY {
            return None;
        }
        Some((self.0 >> 3) as u8)
    }
}

/// One `[SD-ID param="value" ...]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredElement {
    pub id: String,
    pub params: Vec<(String, String)>,
}

/// Decoded RFC 5424 message. NILVALUE header fields decode to empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub priority: Priority,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: String,
    pub app_name: String,
    pub proc_id: String,
    pub msg_id: String,
    pub structured_data: Vec<StructuredElement>,
    pub message: Vec<u8>,
}

impl SyslogMessage {
    /// Decode one message, with or without an octet-counting frame.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let frame = unframe(raw)?;
        let mut cur = Cursor::new(frame);

        let priority = parse_priority(&mut cur)?;
        parse_version(&mut cur)?;
        cur.expect_space("SP after VERSION")?;

        let timestamp = parse_timestamp(&mut cur)?;
        cur.expect_space("SP after TIMESTAMP")?;

        let hostname = header_field(&mut cur, "HOSTNAME", HOSTNAME_MAX)?;
        cur.expect_space("SP after HOSTNAME")?;
        let app_name = header_field(&mut cur, "APP-NAME", APP_NAME_MAX)?;
        cur.expect_space("SP after APP-NAME")?;
        let proc_id = header_field(&mut cur, "PROCID", PROCID_MAX)?;
        cur.expect_space("SP after PROCID")?;
        let msg_id = header_field(&mut cur, "MSGID", MSGID_MAX)?;
        cur.expect_space("SP after MSGID")?;

        let structured_data = parse_structured_data(&mut cur)?;

        let message = match cur.peek() {
            None => Vec::new(),
            Some(b' ') => {
                cur.advance(1);
                let rest = cur.rest();
                rest.strip_prefix(BOM).unwrap_or(rest).to_vec()
            }
            // Line ending after SD with no MSG
            Some(_) if cur.remaining().iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Some(ch) => {
                return Err(ParseError::InvalidStructuredData(format!(
                    "unexpected {:?} after structured data",
                    ch as char
                )))
            }
        };

        Ok(SyslogMessage {
            priority,
            timestamp,
            hostname,
            app_name,
            proc_id,
            msg_id,
            structured_data,
            message,
        })
    }

    /// Render the message in RFC 5424 wire format, without framing.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = String::with_capacity(64);

        let timestamp = self
            .timestamp
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .unwrap_or_else(|| "-".to_string());

        // Writing to a String never fails
        let _ = write!(
            header,
            "<{}>1 {} {} {} {} {} ",
            self.priority.0,
            timestamp,
            nil_if_empty(&self.hostname),
            nil_if_empty(&self.app_name),
            nil_if_empty(&self.proc_id),
            nil_if_empty(&self.msg_id),
        );

        if self.structured_data.is_empty() {
            header.push('-');
        }
        for element in &self.structured_data {
            header.push('[');
            header.push_str(&element.id);
            for (name, value) in &element.params {
                let _ = write!(header, " {}=\"{}\"", name, escape_param_value(value));
            }
            header.push(']');
        }

        let mut out = header.into_bytes();
        if !self.message.is_empty() {
            out.push(b' ');
            out.extend_from_slice(&self.message);
        }
        out
    }
}

fn nil_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn escape_param_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '"' | '\\' | ']') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Byte cursor over a single message.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn expect_space(&mut self, what: &'static str) -> Result<(), ParseError> {
        match self.bump() {
            Some(b' ') => Ok(()),
            Some(ch) => Err(ParseError::InvalidField {
                field: what,
                reason: format!("found {:?}", ch as char),
            }),
            None => Err(ParseError::UnexpectedEnd(what)),
        }
    }

    /// Take bytes until `stop` matches, leaving the cursor on the stop byte.
    fn take_until(&mut self, stop: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if stop(ch) {
                break;
            }
            self.pos += 1;
        }
        &self.buf[start..self.pos]
    }

    fn take_token(&mut self) -> &'a [u8] {
        self.take_until(|ch| ch == b' ')
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Strip an octet-counting frame when present.
fn unframe(raw: &[u8]) -> Result<&[u8], ParseError> {
    let first = *raw.first().ok_or(ParseError::Empty)?;
    if !first.is_ascii_digit() {
        return Ok(raw);
    }

    let space = raw
        .iter()
        .position(|&ch| ch == b' ')
        .ok_or_else(|| ParseError::InvalidFrame("missing SP after MSG-LEN".into()))?;
    let digits = &raw[..space];
    if digits.len() > 9 || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidFrame(format!(
            "invalid MSG-LEN {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    let expected: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidFrame("invalid MSG-LEN".into()))?;

    let body = &raw[space + 1..];
    if body.len() < expected {
        return Err(ParseError::TruncatedFrame {
            expected,
            actual: body.len(),
        });
    }

    let (message, trailing) = body.split_at(expected);
    if !trailing.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::TrailingData(trailing.len()));
    }

    Ok(message)
}

fn parse_priority(cur: &mut Cursor<'_>) -> Result<Priority, ParseError> {
    if cur.bump() != Some(b'<') {
        return Err(ParseError::InvalidPriority("missing '<'".into()));
    }

    let digits = cur.take_until(|ch| !ch.is_ascii_digit());
    if digits.is_empty() || digits.len() > 3 {
        return Err(ParseError::InvalidPriority(format!(
            "expected 1 to 3 digits, found {}",
            digits.len()
        )));
    }

    if cur.bump() != Some(b'>') {
        return Err(ParseError::InvalidPriority("missing '>'".into()));
    }

    let value = digits
        .iter()
        .fold(0u16, |acc, ch| acc * 10 + u16::from(ch - b'0'));
    Ok(Priority(value))
}

fn parse_version(cur: &mut Cursor<'_>) -> Result<(), ParseError> {
    let version = cur.take_token();
    match version {
        b"1" => Ok(()),
        b"" => Err(ParseError::UnexpectedEnd("VERSION")),
        other => Err(ParseError::UnsupportedVersion(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

fn parse_timestamp(cur: &mut Cursor<'_>) -> Result<Option<DateTime<Utc>>, ParseError> {
    let token = cur.take_token();
    if token.is_empty() {
        return Err(ParseError::UnexpectedEnd("TIMESTAMP"));
    }
    if token == NILVALUE {
        return Ok(None);
    }

    let text = std::str::from_utf8(token)
        .map_err(|_| ParseError::InvalidTimestamp("not ASCII".into()))?;

    DateTime::parse_from_rfc3339(text)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|e| ParseError::InvalidTimestamp(format!("{text:?}: {e}")))
}

fn header_field(
    cur: &mut Cursor<'_>,
    field: &'static str,
    max_len: usize,
) -> Result<String, ParseError> {
    let token = cur.take_token();
    if token.is_empty() {
        if cur.peek().is_none() {
            return Err(ParseError::UnexpectedEnd(field));
        }
        return Err(ParseError::InvalidField {
            field,
            reason: "empty value".into(),
        });
    }
    if token == NILVALUE {
        return Ok(String::new());
    }
    if token.len() > max_len {
        return Err(ParseError::InvalidField {
            field,
            reason: format!("longer than {max_len} bytes"),
        });
    }
    if !token.iter().all(|ch| (33..=126).contains(ch)) {
        return Err(ParseError::InvalidField {
            field,
            reason: "contains non-printable characters".into(),
        });
    }

    // Printable ASCII is always valid UTF-8
    Ok(String::from_utf8_lossy(token).into_owned())
}

fn parse_structured_data(cur: &mut Cursor<'_>) -> Result<Vec<StructuredElement>, ParseError> {
    match cur.peek() {
        None => Err(ParseError::UnexpectedEnd("STRUCTURED-DATA")),
        Some(b'-') => {
            cur.advance(1);
            Ok(Vec::new())
        }
        Some(b'[') => {
            let mut elements = Vec::new();
            while cur.peek() == Some(b'[') {
                elements.push(parse_structured_element(cur)?);
            }
            Ok(elements)
        }
        Some(ch) => Err(ParseError::InvalidStructuredData(format!(
            "expected '[' or '-', found {:?}",
            ch as char
        ))),
    }
}

fn parse_sd_name(cur: &mut Cursor<'_>, what: &str) -> Result<String, ParseError> {
    let name = cur.take_until(|ch| matches!(ch, b' ' | b'=' | b']' | b'"'));
    if name.is_empty() {
        return Err(ParseError::InvalidStructuredData(format!("empty {what}")));
    }
    if name.len() > SD_NAME_MAX || !name.iter().all(|ch| (33..=126).contains(ch)) {
        return Err(ParseError::InvalidStructuredData(format!(
            "invalid {what} {:?}",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

// example: [exampleSDID@32473 iut="3" eventSource="Application" eventID="1011"]
fn parse_structured_element(cur: &mut Cursor<'_>) -> Result<StructuredElement, ParseError> {
    // caller checked the opening bracket
    cur.advance(1);
    let id = parse_sd_name(cur, "SD-ID")?;

    let mut params = Vec::new();
    loop {
        match cur.bump() {
            Some(b']') => break,
            Some(b' ') => {
                let name = parse_sd_name(cur, "PARAM-NAME")?;
                if cur.bump() != Some(b'=') {
                    return Err(ParseError::InvalidStructuredData(format!(
                        "expected '=' after {name}"
                    )));
                }
                if cur.bump() != Some(b'"') {
                    return Err(ParseError::InvalidStructuredData(format!(
                        "expected '\"' to open {name} value"
                    )));
                }
                let value = parse_param_value(cur)?;
                params.push((name, value));
            }
            Some(ch) => {
                return Err(ParseError::InvalidStructuredData(format!(
                    "unexpected {:?} in element {id}",
                    ch as char
                )))
            }
            None => return Err(ParseError::UnexpectedEnd("']'")),
        }
    }

    Ok(StructuredElement { id, params })
}

fn parse_param_value(cur: &mut Cursor<'_>) -> Result<String, ParseError> {
    let mut value = Vec::new();
    loop {
        match cur.bump() {
            Some(b'"') => break,
            Some(b'\\') => match cur.peek() {
                Some(ch @ (b'"' | b'\\' | b']')) => {
                    cur.advance(1);
                    value.push(ch);
                }
                // other backslashes are kept as-is
                _ => value.push(b'\\'),
            },
            Some(ch) => value.push(ch),
            None => return Err(ParseError::UnexpectedEnd("closing '\"'")),
        }
    }

    String::from_utf8(value)
        .map_err(|_| ParseError::InvalidStructuredData("PARAM-VALUE is not UTF-8".into()))
}
