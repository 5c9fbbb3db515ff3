use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::callback::{EXPORT_CHECK_PATH, LOAD_CHECK_PATH};

/// Delay schedule between two status checks of the same job.
///
/// The delay grows with the number of "still running" observations recorded
/// on the job and is capped at `max_delay_ms`. A multiplier of 1 gives a fixed
/// cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
  pub initial_delay_ms: u64,
  pub max_delay_ms: u64,
  pub multiplier: u32,
}

impl Default for Backoff {
  fn default() -> Self {
    Self {
      initial_delay_ms: 30_000,
      max_delay_ms: 600_000,
      multiplier: 2,
    }
  }
}

impl Backoff {
  /// Delay before the next check, given how many checks already saw the job running.
  pub fn delay_for(&self, status_check_count: u32) -> Duration {
    let factor = u64::from(self.multiplier.max(1)).saturating_pow(status_check_count);
    let delay = self.initial_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(self.max_delay_ms))
  }
}

/// What starts the load phase of a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTrigger {
  /// The export status poller fans out loads when the export is done.
  #[default]
  ExportCompletion,
  /// Loads start as "object written" notifications arrive for each kind.
  StorageNotification,
}

/// Process-wide orchestration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Most kinds a single export call may cover.
  pub export_batch_size: usize,
  /// Total export provider calls allowed per workflow, first attempt included.
  pub max_export_attempts: u32,
  /// Polls that may observe "still running" before a job is failed.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_status_checks: Option<u32>,
  /// Destination project used when a request does not name one.
  pub default_dest_project_id: String,
  /// Destination dataset used when a request does not name one.
  pub default_dest_dataset_id: String,
  pub check_backoff: Backoff,
  /// Externally reachable base URL the task queue delivers callbacks to.
  pub callback_base_url: String,
  pub load_trigger: LoadTrigger,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      export_batch_size: 30,
      max_export_attempts: 3,
      max_status_checks: None,
      default_dest_project_id: String::new(),
      default_dest_dataset_id: "datastore".to_string(),
      check_backoff: Backoff::default(),
      callback_base_url: "http://localhost:8080".to_string(),
      load_trigger: LoadTrigger::default(),
    }
  }
}

impl Settings {
  pub fn export_check_url(&self) -> String {
    format!("{}{}", self.callback_base_url.trim_end_matches('/'), EXPORT_CHECK_PATH)
  }

  pub fn load_check_url(&self) -> String {
    format!("{}{}", self.callback_base_url.trim_end_matches('/'), LOAD_CHECK_PATH)
  }

  /// True once `status_check_count` running observations exhaust the check budget.
  pub fn check_limit_reached(&self, status_check_count: u32) -> bool {
    self
      .max_status_checks
      .is_some_and(|limit| status_check_count >= limit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_grows_and_caps() {
    let backoff = Backoff {
      initial_delay_ms: 1_000,
      max_delay_ms: 5_000,
      multiplier: 2,
    };

    assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
    assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
    assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
    assert_eq!(backoff.delay_for(3), Duration::from_secs(5));
    assert_eq!(backoff.delay_for(200), Duration::from_secs(5));
  }

  #[test]
  fn test_fixed_backoff() {
    let backoff = Backoff {
      initial_delay_ms: 250,
      max_delay_ms: 10_000,
      multiplier: 1,
    };

    assert_eq!(backoff.delay_for(0), backoff.delay_for(7));
  }

  #[test]
  fn test_callback_urls() {
    let settings = Settings {
      callback_base_url: "https://ferry.example.com/".to_string(),
      ..Default::default()
    };

    assert_eq!(
      settings.export_check_url(),
      "https://ferry.example.com/api/v1/export-job-check"
    );
    assert_eq!(
      settings.load_check_url(),
      "https://ferry.example.com/api/v1/load-job-check"
    );
  }

  #[test]
  fn test_check_limit() {
    let mut settings = Settings::default();
    assert!(!settings.check_limit_reached(u32::MAX));

    settings.max_status_checks = Some(3);
    assert!(!settings.check_limit_reached(2));
    assert!(settings.check_limit_reached(3));
  }
}
