//! Error responses returned by the HTTP handlers.

use axum::Json;
use axum::http::StatusCode;
use ferry_orchestrator::{ErrorKind, OrchestratorError};

/// Error body returned by every endpoint.
///
/// ```json
/// {
///   "error_code": "WORKFLOW_NOT_FOUND",
///   "error_message": "not found: 0f8fad5b-d9cb-469f-a165-70867728950e"
/// }
/// ```
///
/// Codes are SCREAMING_SNAKE_CASE and stable; messages are for display only.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
  /// Not serialized; used to build the response.
  #[serde(skip)]
  pub status_code: StatusCode,
  pub error_code: String,
  pub error_message: String,
}

/// Implemented by every error a handler can return.
pub trait IntoErrorResponse: std::fmt::Display + Send + Sync + 'static {
  fn error_code(&self) -> &'static str;

  fn status_code(&self) -> StatusCode;
}

impl<E> From<E> for ErrorResponse
where
  E: IntoErrorResponse,
{
  fn from(error: E) -> Self {
    ErrorResponse {
      status_code: error.status_code(),
      error_code: error.error_code().to_string(),
      error_message: error.to_string(),
    }
  }
}

impl std::fmt::Display for ErrorResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.error_message.fmt(f)
  }
}

impl axum::response::IntoResponse for ErrorResponse {
  fn into_response(self) -> axum::response::Response {
    (self.status_code, Json(self)).into_response()
  }
}

/// Request bodies and query strings the handlers could not decode.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
  #[error("invalid request body: {0}")]
  Body(String),

  #[error("invalid query string: {0}")]
  Query(String),
}

impl IntoErrorResponse for RequestError {
  fn error_code(&self) -> &'static str {
    match self {
      RequestError::Body(_) => "INVALID_REQUEST_BODY",
      RequestError::Query(_) => "INVALID_QUERY",
    }
  }

  fn status_code(&self) -> StatusCode {
    StatusCode::BAD_REQUEST
  }
}

/// Not-found errors answer 404 so the queue stops redelivering; transient
/// errors answer 5xx so it redelivers.
impl IntoErrorResponse for OrchestratorError {
  fn error_code(&self) -> &'static str {
    match self.kind() {
      ErrorKind::NotFound => "WORKFLOW_NOT_FOUND",
      ErrorKind::Invalid => "INVALID_REQUEST",
      ErrorKind::Rejected => match self {
        OrchestratorError::ExportRejected { .. } => "EXPORT_REJECTED",
        _ => "PROVIDER_REJECTED",
      },
      ErrorKind::Transient => "TEMPORARILY_UNAVAILABLE",
      ErrorKind::Protocol => "PROTOCOL_VIOLATION",
    }
  }

  fn status_code(&self) -> StatusCode {
    match self.kind() {
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::Invalid => StatusCode::BAD_REQUEST,
      ErrorKind::Rejected => StatusCode::BAD_GATEWAY,
      ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
      ErrorKind::Protocol => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// Log an orchestrator error at a level matching its kind and convert it.
pub(crate) fn orchestrator_error(err: OrchestratorError) -> ErrorResponse {
  match err.kind() {
    ErrorKind::Protocol => tracing::error!(error = %err, "protocol_violation"),
    ErrorKind::Transient => tracing::warn!(error = %err, "transient_failure"),
    ErrorKind::Rejected => tracing::warn!(error = %err, "provider_rejected"),
    ErrorKind::NotFound | ErrorKind::Invalid => tracing::debug!(error = %err, "request_refused"),
  }
  err.into()
}
