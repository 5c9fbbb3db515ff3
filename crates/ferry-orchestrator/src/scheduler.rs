//! "Check again later" on top of the task queue.

use std::sync::Arc;
use std::time::Duration;

use ferry_config::{Backoff, ExportCheckRequest, LoadCheckRequest, Settings};
use ferry_queue::{QueueError, Task, TaskQueue};
use tracing::debug;

/// What a status check decided to do after observing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
  /// Still running: the same check was enqueued again.
  Continue,
  /// The job moved on and the next stage was enqueued.
  Advance,
  /// Nothing further was scheduled by this check.
  Stop,
}

/// Enqueues status checks with the configured backoff.
#[derive(Clone)]
pub struct Scheduler {
  queue: Arc<dyn TaskQueue>,
  backoff: Backoff,
  export_check_url: String,
  load_check_url: String,
}

impl Scheduler {
  pub fn new(queue: Arc<dyn TaskQueue>, settings: &Settings) -> Self {
    Self {
      queue,
      backoff: settings.check_backoff,
      export_check_url: settings.export_check_url(),
      load_check_url: settings.load_check_url(),
    }
  }

  /// Schedule an export check after `status_check_count` running observations.
  pub async fn export_check(
    &self,
    request: &ExportCheckRequest,
    status_check_count: u32,
  ) -> Result<Duration, QueueError> {
    let delay = self.backoff.delay_for(status_check_count);
    self
      .queue
      .enqueue(Task::new(&self.export_check_url, request, delay)?)
      .await?;

    debug!(
      workflow_id = %request.workflow_id,
      operation_id = %request.provider_operation_id,
      delay_ms = delay.as_millis() as u64,
      "export check scheduled"
    );
    Ok(delay)
  }

  /// Schedule a load check after `status_check_count` running observations.
  pub async fn load_check(
    &self,
    request: &LoadCheckRequest,
    status_check_count: u32,
  ) -> Result<Duration, QueueError> {
    let delay = self.backoff.delay_for(status_check_count);
    self
      .queue
      .enqueue(Task::new(&self.load_check_url, request, delay)?)
      .await?;

    debug!(
      workflow_id = %request.workflow_id,
      kind = %request.kind,
      delay_ms = delay.as_millis() as u64,
      "load check scheduled"
    );
    Ok(delay)
  }
}

#[cfg(test)]
mod tests {
  use ferry_queue::RecordingQueue;
  use serde_json::json;

  use super::*;

  #[tokio::test]
  async fn test_checks_go_to_their_routes_with_backoff() {
    let queue = Arc::new(RecordingQueue::new());
    let settings = Settings {
      callback_base_url: "https://ferry.example".to_string(),
      check_backoff: Backoff {
        initial_delay_ms: 100,
        max_delay_ms: 1_000,
        multiplier: 3,
      },
      ..Default::default()
    };
    let scheduler = Scheduler::new(queue.clone(), &settings);

    let export = ExportCheckRequest {
      workflow_id: "wf-1".to_string(),
      provider_operation_id: "op-1".to_string(),
    };
    let load = LoadCheckRequest {
      workflow_id: "wf-1".to_string(),
      kind: "Fuga".to_string(),
    };
    assert_eq!(
      scheduler.export_check(&export, 0).await.unwrap(),
      Duration::from_millis(100)
    );
    assert_eq!(
      scheduler.load_check(&load, 2).await.unwrap(),
      Duration::from_millis(900)
    );

    let tasks = queue.take().await;
    assert_eq!(tasks[0].url, "https://ferry.example/api/v1/export-job-check");
    assert_eq!(
      tasks[0].body,
      json!({ "workflowId": "wf-1", "providerOperationId": "op-1" })
    );
    assert_eq!(tasks[1].url, "https://ferry.example/api/v1/load-job-check");
    assert_eq!(tasks[1].body, json!({ "workflowId": "wf-1", "kind": "Fuga" }));
    assert_eq!(tasks[1].delay, Duration::from_millis(900));
  }
}
