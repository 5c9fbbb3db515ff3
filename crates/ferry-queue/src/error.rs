use thiserror::Error;

/// Errors that can occur while enqueueing a task.
#[derive(Debug, Error)]
pub enum QueueError {
  /// The task body could not be encoded.
  #[error("failed to encode task body: {0}")]
  Encode(#[from] serde_json::Error),

  /// The queue service refused the task.
  #[error("queue rejected task with status {status}: {message}")]
  Rejected { status: u16, message: String },

  /// The queue service stayed unavailable after all attempts.
  #[error("queue unavailable with status {status}: {message}")]
  Unavailable { status: u16, message: String },

  /// The request never produced a response.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The queue is shutting down and accepts no new tasks.
  #[error("queue is closed")]
  Closed,
}
