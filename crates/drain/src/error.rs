use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use conversion::ParseError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("method must be POST")]
    MethodNotAllowed,

    #[error("{0}")]
    Body(#[source] axum::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

// Convenience type alias
pub type DrainResult<T> = Result<T, DrainError>;

impl DrainError {
    pub fn status(&self) -> StatusCode {
        match self {
            DrainError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DrainError::Body(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DrainError::Parse(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// `{"error": "<message>"}`, JSON-encoded so any error text yields a valid body.
impl IntoResponse for DrainError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            DrainError::Body(e) => tracing::error!("Failed to read request body: {}", e),
            DrainError::Parse(e) => tracing::debug!("Rejected syslog message: {}", e),
            DrainError::MethodNotAllowed => {}
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
