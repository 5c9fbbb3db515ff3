//! Ferry Queue
//!
//! At-least-once delivery of a JSON POST to a fixed URL after a delay. This
//! is the only way a workflow makes progress: every status check schedules
//! the next one through a [`TaskQueue`].
//!
//! - [`CloudTasksQueue`] creates HTTP tasks on a managed queue.
//! - [`LocalQueue`] delivers in-process with tokio timers, for local runs.
//! - [`RecordingQueue`] only records what was enqueued.

mod cloud_tasks;
mod error;
mod local;
mod recording;

pub use cloud_tasks::{CloudTasksConfig, CloudTasksQueue};
pub use error::QueueError;
pub use local::{Delivery, LocalQueue, LocalQueueConfig, classify_response};
pub use recording::RecordingQueue;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// One delayed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
  pub url: String,
  pub body: serde_json::Value,
  pub delay: Duration,
}

impl Task {
  pub fn new<T: Serialize>(url: impl Into<String>, body: &T, delay: Duration) -> Result<Self, QueueError> {
    Ok(Self {
      url: url.into(),
      body: serde_json::to_value(body)?,
      delay,
    })
  }
}

/// Schedules a task for delivery. A successful return means the task was
/// durably accepted and will be delivered at least once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
  async fn enqueue(&self, task: Task) -> Result<(), QueueError>;
}
