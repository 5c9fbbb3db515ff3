use thiserror::Error;

/// Errors returned by the export, load and catalog clients.
#[derive(Debug, Error)]
pub enum ProviderError {
  /// The provider refused the request; repeating it will not help.
  #[error("rejected with status {status}: {message}")]
  Rejected { status: u16, message: String },

  /// The provider answered with a server-side or throttling status.
  #[error("unavailable with status {status}: {message}")]
  Unavailable { status: u16, message: String },

  /// The request never produced a response.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The response did not have the documented shape.
  #[error("malformed response: {0}")]
  Malformed(String),
}

impl ProviderError {
  /// Classify a non-success HTTP status.
  pub(crate) fn from_status(status: reqwest::StatusCode, message: String) -> Self {
    let status = status.as_u16();
    if status == 429 || status >= 500 {
      ProviderError::Unavailable { status, message }
    } else {
      ProviderError::Rejected { status, message }
    }
  }

  /// Whether the same call may succeed when delivered again.
  pub fn is_transient(&self) -> bool {
    match self {
      ProviderError::Unavailable { .. } => true,
      ProviderError::Http(e) => !e.is_decode(),
      ProviderError::Rejected { .. } | ProviderError::Malformed(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use reqwest::StatusCode;

  use super::*;

  #[test]
  fn test_status_classification() {
    let err = ProviderError::from_status(StatusCode::SERVICE_UNAVAILABLE, "busy".to_string());
    assert!(err.is_transient());

    let err = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
    assert!(err.is_transient());

    let err = ProviderError::from_status(StatusCode::BAD_REQUEST, "bad kind".to_string());
    assert!(matches!(err, ProviderError::Rejected { status: 400, .. }));
    assert!(!err.is_transient());
  }
}
