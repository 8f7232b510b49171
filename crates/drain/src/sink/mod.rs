//! Sink — where converted entries go, and how a request picks one.

use std::sync::Arc;

use conversion::LogEntry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

use crate::config::is_valid_log_id;

/// Accepts entries for asynchronous delivery to the backend.
///
/// `log` must not block; delivery failures are handled by the sink itself.
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// Resolves the sink for a request path.
pub trait SinkProvider: Send + Sync {
    fn sink_for(&self, path: &str) -> Arc<dyn Sink>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery queue full, dropping entry for {0}")]
    QueueFull(String),

    #[error("backend closed, dropping entry for {0}")]
    Closed(String),
}

/// Every request goes to the same sink.
pub struct StaticSinks {
    sink: Arc<dyn Sink>,
}

impl StaticSinks {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

impl SinkProvider for StaticSinks {
    fn sink_for(&self, _path: &str) -> Arc<dyn Sink> {
        Arc::clone(&self.sink)
    }
}

/// Distinct log ids a [`PathSinks`] keeps unless configured otherwise.
pub const DEFAULT_MAX_LOG_IDS: usize = 100;

/// The first path segment names the log id; one sink is created and cached per id.
///
/// Requests whose first segment is empty or not a valid log id use `default_log_id`,
/// as do new log ids once `max_log_ids` are cached.
pub struct PathSinks<F> {
    default_log_id: String,
    max_log_ids: usize,
    factory: F,
    sinks: DashMap<String, Arc<dyn Sink>>,
}

impl<F> PathSinks<F>
where
    F: Fn(&str) -> Arc<dyn Sink> + Send + Sync,
{
    pub fn new(default_log_id: impl Into<String>, factory: F) -> Self {
        Self {
            default_log_id: default_log_id.into(),
            max_log_ids: DEFAULT_MAX_LOG_IDS,
            factory,
            sinks: DashMap::new(),
        }
    }

    /// Limit on cached log ids, not counting the default.
    pub fn with_max_log_ids(mut self, max_log_ids: usize) -> Self {
        self.max_log_ids = max_log_ids;
        self
    }

    /// Number of distinct log ids seen so far.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn cached_log_ids(&self) -> usize {
        let default_cached = self.sinks.contains_key(&self.default_log_id);
        self.sinks.len() - usize::from(default_cached)
    }

    fn log_id_for<'a>(&'a self, path: &'a str) -> &'a str {
        let segment = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        if segment.is_empty() {
            return &self.default_log_id;
        }
        if !is_valid_log_id(segment) {
            warn!(segment, fallback = %self.default_log_id, "Invalid log id in path, using default");
            return &self.default_log_id;
        }
        segment
    }
}

impl<F> SinkProvider for PathSinks<F>
where
    F: Fn(&str) -> Arc<dyn Sink> + Send + Sync,
{
    fn sink_for(&self, path: &str) -> Arc<dyn Sink> {
        let mut log_id = self.log_id_for(path);

        if let Some(sink) = self.sinks.get(log_id) {
            return Arc::clone(sink.value());
        }

        if log_id != self.default_log_id && self.cached_log_ids() >= self.max_log_ids {
            warn!(
                log_id,
                max_log_ids = self.max_log_ids,
                fallback = %self.default_log_id,
                "Log id limit reached, using default"
            );
            log_id = self.default_log_id.as_str();
        }

        let sink = self
            .sinks
            .entry(log_id.to_string())
            .or_insert_with(|| (self.factory)(log_id));
        Arc::clone(sink.value())
    }
}
