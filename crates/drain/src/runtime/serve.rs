//! Serve — backend client, sink wiring, HTTP listener and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{http::StatusCode, Router};
use conversion::Rfc5424Converter;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::backend::Client;
use crate::config::{BackendConfig, DrainConfig, ServerConfig, SinkScope};
use crate::handler::Drain;
use crate::sink::{PathSinks, SinkProvider, StaticSinks};

/// Run the drain until Ctrl+C / SIGTERM, then flush the backend.
pub async fn serve(config: DrainConfig) -> Result<()> {
    let client = Client::spawn(&config.backend)
        .await
        .context("Failed to create backend client")?;

    let sinks = build_sinks(&client, &config.backend);
    let drain = Drain::new(Arc::new(Rfc5424Converter), sinks)
        .with_body_limit(config.server.body_limit_bytes);
    let app = build_router(drain, &config.server);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Listening on: http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    info!("Closing syslog drain...");
    client
        .close()
        .await
        .context("Failed to flush backend entries")?;
    served?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Sink provider for the configured scope.
pub fn build_sinks(client: &Client, backend: &BackendConfig) -> Arc<dyn SinkProvider> {
    match backend.scope {
        SinkScope::Static => {
            let logger = client.logger(&backend.log_id);
            info!(log_name = logger.log_name(), "Forwarding all requests to one log");
            Arc::new(StaticSinks::new(Arc::new(logger)))
        }
        SinkScope::Path => {
            info!(
                default_log_id = %backend.log_id,
                max_log_ids = backend.max_log_ids,
                "Selecting log id from the first path segment"
            );
            Arc::new(
                PathSinks::new(backend.log_id.clone(), client.logger_factory())
                    .with_max_log_ids(backend.max_log_ids),
            )
        }
    }
}

/// Drain router with request tracing and, unless `request_timeout_secs` is 0,
/// a request timeout answered with 408.
pub fn build_router(drain: Drain, server: &ServerConfig) -> Router {
    let timeout = (server.request_timeout_secs > 0).then(|| {
        TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.request_timeout_secs),
        )
    });

    drain.into_router().layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .option_layer(timeout),
    )
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Method, Request}};
    use serde_json::Value;
    use tokio::io::AsyncReadExt;
    use tower::ServiceExt;

    use crate::sink::{MockSink, Sink};

    const MESSAGE: &str = "<6>1 2024-05-01T12:00:00Z web-1 nginx 311 ACCESS - GET /index.html 200\n";

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(MESSAGE))
            .unwrap()
    }

    async fn run(scope: SinkScope, uris: &[&str]) -> Vec<Value> {
        let mut config = DrainConfig::default();
        config.backend.project_id = "my-project".to_string();
        config.backend.scope = scope;

        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let client = Client::with_output(&config.backend.project_id, 16, Box::new(writer));

        let sinks = build_sinks(&client, &config.backend);
        let app = build_router(Drain::new(Arc::new(Rfc5424Converter), sinks), &config.server);

        for uri in uris {
            let response = app.clone().oneshot(post(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }

        drop(app);
        client.close().await.unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_static_scope_writes_to_configured_log() {
        let lines = run(SinkScope::Static, &["/", "/web"]).await;

        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line["logName"], "projects/my-project/logs/syslog");
        }
        assert_eq!(lines[0]["severity"], "INFO");
        assert_eq!(lines[0]["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(lines[0]["jsonPayload"]["host_name"], "web-1");
        assert_eq!(lines[0]["jsonPayload"]["app_name"], "nginx");
        assert_eq!(lines[0]["jsonPayload"]["process_id"], "311");
        assert_eq!(lines[0]["jsonPayload"]["message_id"], "ACCESS");
        assert_eq!(lines[0]["jsonPayload"]["message"], "GET /index.html 200");
    }

    #[tokio::test]
    async fn test_path_scope_selects_log_from_path() {
        let lines = run(SinkScope::Path, &["/web", "/worker/extra", "/"]).await;

        let names: Vec<&str> = lines.iter().map(|l| l["logName"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "projects/my-project/logs/web",
                "projects/my-project/logs/worker",
                "projects/my-project/logs/syslog",
            ]
        );
    }

    fn stalled_request() -> Request<Body> {
        let body = tokio_stream::pending::<Result<bytes::Bytes, std::io::Error>>();
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::from_stream(body))
            .unwrap()
    }

    fn silent_drain() -> Drain {
        let mut sink = MockSink::new();
        sink.expect_log().times(0);
        let sink: Arc<dyn Sink> = Arc::new(sink);
        Drain::new(Arc::new(Rfc5424Converter), Arc::new(StaticSinks::new(sink)))
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let mut server = DrainConfig::default().server;
        server.request_timeout_secs = 1;
        let app = build_router(silent_drain(), &server);

        let response = app.oneshot(stalled_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_layer() {
        let mut server = DrainConfig::default().server;
        server.request_timeout_secs = 0;
        let app = build_router(silent_drain(), &server);

        let pending = tokio::time::timeout(Duration::from_millis(1500), app.oneshot(stalled_request())).await;
        assert!(pending.is_err(), "request should still be waiting for its body");
    }
}
