use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{QueueError, Task, TaskQueue};

/// Queue that keeps enqueued tasks in memory instead of delivering them.
///
/// Tests drain it with [`RecordingQueue::take`] and feed the bodies back to
/// the handlers, playing the role of the delivery mechanism.
#[derive(Debug, Default)]
pub struct RecordingQueue {
  tasks: Mutex<Vec<Task>>,
  failures: AtomicU32,
}

impl RecordingQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fail the next `count` enqueues with [`QueueError::Unavailable`].
  pub fn fail_next(&self, count: u32) {
    self.failures.store(count, Ordering::SeqCst);
  }

  /// Tasks enqueued so far, oldest first.
  pub async fn tasks(&self) -> Vec<Task> {
    self.tasks.lock().await.clone()
  }

  /// Remove and return every recorded task.
  pub async fn take(&self) -> Vec<Task> {
    std::mem::take(&mut *self.tasks.lock().await)
  }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
  async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
    let failing = self
      .failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return Err(QueueError::Unavailable {
        status: 503,
        message: "injected failure".to_string(),
      });
    }

    self.tasks.lock().await.push(task);
    Ok(())
  }
}
