//! Drain endpoint — accepts one syslog message per POST and forwards it.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use conversion::Converter;
use tracing::debug;

use crate::error::{DrainError, DrainResult};
use crate::sink::SinkProvider;

/// HTTP drain: read body, convert, forward to the sink for the request path.
///
/// Holds no per-request state; one instance serves all requests concurrently.
pub struct Drain {
    converter: Arc<dyn Converter>,
    sinks: Arc<dyn SinkProvider>,
    body_limit: usize,
}

impl Drain {
    pub fn new(converter: Arc<dyn Converter>, sinks: Arc<dyn SinkProvider>) -> Self {
        Self {
            converter,
            sinks,
            body_limit: usize::MAX,
        }
    }

    /// Bodies larger than `limit` bytes fail the read.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Router serving the drain on every path.
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(drain_handler)
            .with_state(Arc::new(self))
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, method: &Method, path: &str, body: Body) -> DrainResult<()> {
        if *method != Method::POST {
            return Err(DrainError::MethodNotAllowed);
        }

        let data: Bytes = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(DrainError::Body)?;

        let entry = self.converter.convert(&data)?;

        debug!(path, severity = %entry.severity, bytes = data.len(), "Forwarding entry");
        self.sinks.sink_for(path).log(entry);
        Ok(())
    }
}

async fn drain_handler(
    State(drain): State<Arc<Drain>>,
    method: Method,
    uri: Uri,
    body: Body,
) -> Response {
    match drain.handle(&method, uri.path(), body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}
