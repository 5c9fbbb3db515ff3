use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::{QueueError, Task, TaskQueue};

/// What the queue does with a task after one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  /// Delivered; forget the task.
  Ack,
  /// Deliver again after a backoff.
  Retry,
  /// Permanent client error; forget the task.
  Drop,
}

/// Classify a handler response the way a managed HTTP queue does.
///
/// 409 is the handlers' "still running, already re-enqueued" answer and
/// counts as delivered.
pub fn classify_response(status: StatusCode) -> Delivery {
  if status.is_success() || status == StatusCode::CONFLICT {
    Delivery::Ack
  } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
    Delivery::Retry
  } else {
    Delivery::Drop
  }
}

/// Settings for [`LocalQueue`].
#[derive(Debug, Clone)]
pub struct LocalQueueConfig {
  /// Delivery attempts per task, including the first.
  pub max_attempts: u32,
  pub redelivery_delay: Duration,
  pub max_redelivery_delay: Duration,
  pub timeout: Duration,
}

impl Default for LocalQueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: 10,
      redelivery_delay: Duration::from_secs(1),
      max_redelivery_delay: Duration::from_secs(60),
      timeout: Duration::from_secs(60),
    }
  }
}

impl LocalQueueConfig {
  fn redelivery_delay_for(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self
      .redelivery_delay
      .saturating_mul(factor)
      .min(self.max_redelivery_delay)
  }
}

/// In-process queue delivering tasks with tokio timers.
///
/// Pending tasks live only in memory and are lost when the process exits,
/// so this is meant for local runs against a single server.
#[derive(Debug, Clone)]
pub struct LocalQueue {
  http: Client,
  config: LocalQueueConfig,
  tracker: TaskTracker,
  cancel: CancellationToken,
}

impl LocalQueue {
  pub fn new(config: LocalQueueConfig, cancel: CancellationToken) -> Result<Self, QueueError> {
    let http = Client::builder().timeout(config.timeout).build()?;
    Ok(Self {
      http,
      config,
      tracker: TaskTracker::new(),
      cancel,
    })
  }

  /// Number of tasks waiting for or in delivery.
  pub fn pending(&self) -> usize {
    self.tracker.len()
  }

  /// Wait until every pending task has been delivered or given up on.
  pub async fn wait_idle(&self) {
    self.tracker.close();
    self.tracker.wait().await;
    self.tracker.reopen();
  }

  /// Stop delivering and wait for in-flight attempts to finish.
  pub async fn shutdown(&self) {
    self.cancel.cancel();
    self.tracker.close();
    self.tracker.wait().await;
  }
}

#[async_trait]
impl TaskQueue for LocalQueue {
  async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
    if self.cancel.is_cancelled() {
      return Err(QueueError::Closed);
    }

    let http = self.http.clone();
    let config = self.config.clone();
    let cancel = self.cancel.clone();
    self.tracker.spawn(deliver(http, config, cancel, task));
    Ok(())
  }
}

async fn deliver(http: Client, config: LocalQueueConfig, cancel: CancellationToken, task: Task) {
  let mut wait = task.delay;

  for attempt in 1..=config.max_attempts {
    tokio::select! {
      _ = cancel.cancelled() => {
        debug!(url = %task.url, "queue closed before delivery");
        return;
      }
      _ = tokio::time::sleep(wait) => {}
    }

    let outcome = match http.post(&task.url).json(&task.body).send().await {
      Ok(response) => classify_response(response.status()),
      Err(e) => {
        warn!(url = %task.url, attempt, error = %e, "task delivery failed");
        Delivery::Retry
      }
    };

    match outcome {
      Delivery::Ack => {
        debug!(url = %task.url, attempt, "task delivered");
        return;
      }
      Delivery::Drop => {
        warn!(url = %task.url, attempt, body = %task.body, "task dropped after client error");
        return;
      }
      Delivery::Retry => wait = config.redelivery_delay_for(attempt),
    }
  }

  error!(
    url = %task.url,
    attempts = config.max_attempts,
    body = %task.body,
    "task abandoned after max delivery attempts"
  );
}
