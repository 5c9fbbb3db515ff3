//! Orchestrator errors.

use ferry_provider::ProviderError;
use ferry_queue::QueueError;

/// Coarse classification the HTTP layer maps to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The workflow or load record does not exist. Never retried.
  NotFound,
  /// The inbound request is unusable.
  Invalid,
  /// A provider refused the request for good.
  Rejected,
  /// Redelivering the same request may succeed.
  Transient,
  /// A collaborator or stored record broke an invariant. Never retried.
  Protocol,
}

/// Errors that can occur while driving a workflow.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  /// No record under this key.
  #[error("not found: {0}")]
  NotFound(String),

  /// The request cannot start a workflow.
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// The export provider refused to start an export.
  #[error("export rejected for workflow '{workflow_id}'")]
  ExportRejected {
    workflow_id: String,
    #[source]
    source: ProviderError,
  },

  /// Calling a provider failed.
  #[error("provider error: {0}")]
  Provider(#[from] ProviderError),

  /// Scheduling the next check failed.
  #[error("queue error: {0}")]
  Queue(#[from] QueueError),

  /// The record store failed.
  #[error("store error: {0}")]
  Store(#[source] ferry_store::Error),

  /// An invariant was broken: missing export metadata, a running load
  /// without a provider job, an illegal state transition.
  #[error("protocol violation: {0}")]
  Protocol(String),
}

impl From<ferry_store::Error> for OrchestratorError {
  fn from(e: ferry_store::Error) -> Self {
    match e {
      ferry_store::Error::NotFound(key) => OrchestratorError::NotFound(key),
      ferry_store::Error::InvalidTransition { .. } | ferry_store::Error::AlreadyExists(_) => {
        OrchestratorError::Protocol(e.to_string())
      }
      other => OrchestratorError::Store(other),
    }
  }
}

impl OrchestratorError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      OrchestratorError::NotFound(_) => ErrorKind::NotFound,
      OrchestratorError::InvalidRequest(_) => ErrorKind::Invalid,
      OrchestratorError::ExportRejected { .. } => ErrorKind::Rejected,
      OrchestratorError::Provider(ProviderError::Malformed(_)) => ErrorKind::Protocol,
      OrchestratorError::Provider(e) if e.is_transient() => ErrorKind::Transient,
      OrchestratorError::Provider(_) => ErrorKind::Rejected,
      OrchestratorError::Queue(QueueError::Encode(_)) => ErrorKind::Protocol,
      OrchestratorError::Queue(_) => ErrorKind::Transient,
      OrchestratorError::Store(_) => ErrorKind::Transient,
      OrchestratorError::Protocol(_) => ErrorKind::Protocol,
    }
  }
}

#[cfg(test)]
mod tests {
  use ferry_store::JobStatus;

  use super::*;

  #[test]
  fn test_store_errors_are_classified() {
    let err = OrchestratorError::from(ferry_store::Error::NotFound("wf-1".to_string()));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = OrchestratorError::from(ferry_store::Error::InvalidTransition {
      key: "wf-1".to_string(),
      from: JobStatus::Done,
      to: JobStatus::Failed,
    });
    assert_eq!(err.kind(), ErrorKind::Protocol);
  }

  #[test]
  fn test_provider_errors_are_classified() {
    let err = OrchestratorError::from(ProviderError::Unavailable {
      status: 503,
      message: "busy".to_string(),
    });
    assert_eq!(err.kind(), ErrorKind::Transient);

    let err = OrchestratorError::from(ProviderError::Rejected {
      status: 403,
      message: "denied".to_string(),
    });
    assert_eq!(err.kind(), ErrorKind::Rejected);

    let err = OrchestratorError::from(ProviderError::Malformed("no status".to_string()));
    assert_eq!(err.kind(), ErrorKind::Protocol);
  }
}
