//! Backend — delivers entries to the logging backend.
//!
//! [`Client`] owns a background writer task fed by a bounded queue. Each
//! [`Logger`] it hands out is a [`Sink`] bound to one log name. Entries are
//! written one JSON object per line in the backend's `LogEntry` shape, which
//! the platform's logging agent ingests from stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use conversion::{LogEntry, Severity};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BackendConfig, EntryOutput};
use crate::sink::{Sink, SinkError};

/// Destination for encoded entries.
pub type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// One entry on its way to the writer.
struct Record {
    log_name: Arc<str>,
    entry: LogEntry,
}

/// Backend wire shape of a single entry.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry<'a> {
    log_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    severity: Severity,
    json_payload: Map<String, Value>,
}

impl<'a> WireEntry<'a> {
    fn new(log_name: &'a str, entry: &LogEntry) -> Self {
        let json_payload = entry
            .payload
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        Self {
            log_name,
            timestamp: entry.timestamp.map(format_timestamp),
            severity: entry.severity,
            json_payload,
        }
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// `projects/<project>/logs/<log id>` with `/` in the id percent-encoded.
pub fn log_name(project_id: &str, log_id: &str) -> String {
    format!("projects/{}/logs/{}", project_id, log_id.replace('/', "%2F"))
}

pub struct Client {
    project_id: String,
    tx: mpsc::Sender<Record>,
    shutdown_tx: watch::Sender<bool>,
    writer: JoinHandle<Result<u64>>,
}

impl Client {
    /// Open the configured output and start the writer task.
    pub async fn spawn(config: &BackendConfig) -> Result<Self> {
        let output: Output = match &config.output {
            EntryOutput::Stdout => Box::new(tokio::io::stdout()),
            EntryOutput::File { path } => {
                let file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .with_context(|| format!("Failed to open entry output '{}'", path))?;
                Box::new(file)
            }
        };

        info!(project_id = %config.project_id, output = ?config.output, "Backend client started");
        Ok(Self::with_output(&config.project_id, config.queue_capacity, output))
    }

    /// Start the writer task on an arbitrary output.
    pub fn with_output(project_id: &str, queue_capacity: usize, output: Output) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let writer = tokio::spawn(run_writer(rx, shutdown_rx, output));

        Self {
            project_id: project_id.to_string(),
            tx,
            shutdown_tx,
            writer,
        }
    }

    /// A sink writing to `log_id` in this client's project.
    pub fn logger(&self, log_id: &str) -> Logger {
        Logger::new(log_name(&self.project_id, log_id), self.tx.clone())
    }

    /// Creates loggers for any log id on demand, e.g. for [`crate::sink::PathSinks`].
    pub fn logger_factory(&self) -> impl Fn(&str) -> Arc<dyn Sink> + Send + Sync + 'static {
        let project_id = self.project_id.clone();
        let tx = self.tx.clone();
        move |log_id: &str| {
            Arc::new(Logger::new(log_name(&project_id, log_id), tx.clone())) as Arc<dyn Sink>
        }
    }

    /// Stop accepting entries, write everything already queued and flush.
    ///
    /// Returns the number of entries written over the client's lifetime.
    pub async fn close(self) -> Result<u64> {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);

        let written = self
            .writer
            .await
            .context("Backend writer task panicked")??;
        info!(written, "Backend client closed");
        Ok(written)
    }
}

async fn run_writer(
    rx: mpsc::Receiver<Record>,
    shutdown_rx: watch::Receiver<bool>,
    output: Output,
) -> Result<u64> {
    // The queue closes with the task, so later entries only see `SinkError::Closed`
    write_entries(rx, shutdown_rx, output)
        .await
        .inspect_err(|e| error!("Backend writer stopped: {:#}", e))
}

async fn write_entries(
    mut rx: mpsc::Receiver<Record>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut output: Output,
) -> Result<u64> {
    let mut written = 0u64;

    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => {
                    write_record(&mut output, &record).await?;
                    written += 1;
                }
                None => break,
            },
            _ = shutdown_rx.changed() => {
                // Refuse new entries but keep what is already queued
                rx.close();
                while let Some(record) = rx.recv().await {
                    write_record(&mut output, &record).await?;
                    written += 1;
                }
                break;
            }
        }
    }

    output.flush().await.context("Failed to flush entry output")?;
    Ok(written)
}

async fn write_record(output: &mut Output, record: &Record) -> Result<()> {
    let mut line = serde_json::to_vec(&WireEntry::new(&record.log_name, &record.entry))
        .context("Failed to encode entry")?;
    line.push(b'\n');

    output
        .write_all(&line)
        .await
        .context("Failed to write entry")?;
    debug!(log_name = %record.log_name, severity = %record.entry.severity, "Entry delivered");
    Ok(())
}

/// Sink bound to one log name. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    log_name: Arc<str>,
    tx: mpsc::Sender<Record>,
}

impl Logger {
    fn new(log_name: String, tx: mpsc::Sender<Record>) -> Self {
        Self {
            log_name: Arc::from(log_name),
            tx,
        }
    }

    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    fn try_log(&self, entry: LogEntry) -> Result<(), SinkError> {
        let record = Record {
            log_name: Arc::clone(&self.log_name),
            entry,
        };

        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull(self.log_name.to_string()),
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed(self.log_name.to_string()),
        })
    }
}

impl Sink for Logger {
    fn log(&self, entry: LogEntry) {
        if let Err(e) = self.try_log(entry) {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncReadExt;

    fn entry(message: &str) -> LogEntry {
        let mut entry = LogEntry::new(Some(Utc.timestamp_opt(1234, 0).unwrap()), Severity::Error);
        entry.payload = vec![
            ("host_name".to_string(), "some-host".to_string()),
            ("message".to_string(), message.to_string()),
        ];
        entry
    }

    async fn read_lines(mut reader: tokio::io::DuplexStream) -> Vec<Value> {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        buf.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn test_log_name_encodes_slashes() {
        assert_eq!(log_name("p", "syslog"), "projects/p/logs/syslog");
        assert_eq!(log_name("p", "apps/web"), "projects/p/logs/apps%2Fweb");
    }

    #[tokio::test]
    async fn test_logger_writes_wire_entries() {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let client = Client::with_output("my-project", 16, Box::new(writer));
        let logger = client.logger("syslog");

        logger.log(entry("first"));
        logger.log(LogEntry::new(None, Severity::Default));

        let written = tokio_test::assert_ok!(client.close().await);
        assert_eq!(written, 2);

        let lines = read_lines(reader).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["logName"], "projects/my-project/logs/syslog");
        assert_eq!(lines[0]["timestamp"], "1970-01-01T00:20:34Z");
        assert_eq!(lines[0]["severity"], "ERROR");
        assert_eq!(lines[0]["jsonPayload"]["host_name"], "some-host");
        assert_eq!(lines[0]["jsonPayload"]["message"], "first");
        assert!(lines[1].get("timestamp").is_none());
        assert_eq!(lines[1]["severity"], "DEFAULT");
    }

    #[tokio::test]
    async fn test_loggers_share_writer() {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let client = Client::with_output("p", 16, Box::new(writer));

        client.logger("web").log(entry("a"));
        client.logger("worker").log(entry("b"));
        client.close().await.unwrap();

        let names: Vec<_> = read_lines(reader)
            .await
            .into_iter()
            .map(|l| l["logName"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["projects/p/logs/web", "projects/p/logs/worker"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let logger = Logger { log_name: Arc::from("projects/p/logs/x"), tx };

        assert!(logger.try_log(entry("kept")).is_ok());
        let err = logger.try_log(entry("dropped")).unwrap_err();
        assert!(matches!(err, SinkError::QueueFull(_)));

        // Sink::log swallows the error
        logger.log(entry("also dropped"));
        assert_eq!(rx.recv().await.unwrap().entry.field("message"), Some("kept"));
    }

    #[tokio::test]
    async fn test_logging_after_close_is_dropped() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let client = Client::with_output("p", 4, Box::new(writer));
        let logger = client.logger("syslog");
        client.close().await.unwrap();

        let err = logger.try_log(entry("late")).unwrap_err();
        assert!(matches!(err, SinkError::Closed(_)));
    }

    #[tokio::test]
    async fn test_write_failure_stops_writer() {
        let (writer, reader) = tokio::io::duplex(1024);
        drop(reader);
        let client = Client::with_output("p", 4, Box::new(writer));
        let logger = client.logger("syslog");

        logger.log(entry("lost"));
        tokio::time::timeout(std::time::Duration::from_secs(5), logger.tx.closed())
            .await
            .expect("writer should stop after a failed write");

        assert!(matches!(logger.try_log(entry("late")), Err(SinkError::Closed(_))));
        let err = client.close().await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to write entry"));
    }
}
