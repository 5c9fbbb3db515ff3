use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::Error;

/// Status shared by export and load jobs.
///
/// `Created -> Running -> {Failed, Done}`. A failed export may re-enter
/// `Running` through a bounded re-export; nothing ever leaves `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
  Created,
  Running,
  Failed,
  Done,
}

impl JobStatus {
  /// Done or Failed.
  pub fn is_terminal(self) -> bool {
    matches!(self, JobStatus::Failed | JobStatus::Done)
  }
}

/// Terminal outcome reported for one provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
  pub operation_id: String,
  pub message: String,
}

/// One export-to-load workflow as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExportJob {
  pub workflow_id: String,
  pub project_id: String,
  pub namespace_ids: Json<Vec<String>>,
  pub requested_kinds: Json<Vec<String>>,
  pub output_location: String,
  /// The inbound request, verbatim.
  pub request_body: String,
  /// Append-only; the last entry is the operation currently being polled.
  pub provider_operation_ids: Json<Vec<String>>,
  pub status: JobStatus,
  pub status_check_count: u32,
  pub retry_count: u32,
  /// Append-only; duplicate terminal callbacks show up as repeated entries.
  pub response_messages: Json<Vec<ResponseMessage>>,
  pub output_url_prefix: Option<String>,
  pub change_status_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl ExportJob {
  /// A freshly created export job with no provider operation yet.
  pub fn new(
    workflow_id: impl Into<String>,
    project_id: impl Into<String>,
    namespace_ids: Vec<String>,
    requested_kinds: Vec<String>,
    output_location: impl Into<String>,
    request_body: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      workflow_id: workflow_id.into(),
      project_id: project_id.into(),
      namespace_ids: Json(namespace_ids),
      requested_kinds: Json(requested_kinds),
      output_location: output_location.into(),
      request_body: request_body.into(),
      provider_operation_ids: Json(Vec::new()),
      status: JobStatus::Created,
      status_check_count: 0,
      retry_count: 0,
      response_messages: Json(Vec::new()),
      output_url_prefix: None,
      change_status_at: now,
      created_at: now,
      updated_at: now,
    }
  }

  /// The operation handle currently being polled, if any.
  pub fn current_operation_id(&self) -> Option<&str> {
    self.provider_operation_ids.last().map(String::as_str)
  }

  pub(crate) fn start(
    &mut self,
    operation_id: &str,
    retry_count: u32,
    now: DateTime<Utc>,
  ) -> Result<(), Error> {
    match self.status {
      JobStatus::Created | JobStatus::Failed => {}
      // The same start applied twice.
      JobStatus::Running if self.current_operation_id() == Some(operation_id) => return Ok(()),
      from => {
        return Err(Error::InvalidTransition {
          key: self.workflow_id.clone(),
          from,
          to: JobStatus::Running,
        });
      }
    }

    self.provider_operation_ids.push(operation_id.to_string());
    self.status = JobStatus::Running;
    self.retry_count = retry_count;
    self.change_status_at = now;
    Ok(())
  }

  /// Apply the terminal outcome reported for `operation_id`.
  ///
  /// Returns true only for the call that moved the job into `status`. A
  /// repeated outcome appends its message and returns false; an outcome for a
  /// superseded operation changes nothing. An empty `operation_id` stands for
  /// an export call that never produced an operation.
  pub(crate) fn finish(
    &mut self,
    operation_id: &str,
    status: JobStatus,
    message: &str,
    now: DateTime<Utc>,
  ) -> Result<bool, Error> {
    if !status.is_terminal() {
      return Err(Error::InvalidTransition {
        key: self.workflow_id.clone(),
        from: self.status,
        to: status,
      });
    }
    if !operation_id.is_empty() && self.current_operation_id() != Some(operation_id) {
      return Ok(false);
    }
    if self.status.is_terminal() && self.status != status {
      return Err(Error::InvalidTransition {
        key: self.workflow_id.clone(),
        from: self.status,
        to: status,
      });
    }

    let transitioned = self.status != status;
    if transitioned {
      self.status = status;
      self.change_status_at = now;
    }
    self.response_messages.push(ResponseMessage {
      operation_id: operation_id.to_string(),
      message: message.to_string(),
    });
    Ok(transitioned)
  }
}

/// An export job after [`Store::finish_export`](crate::Store::finish_export).
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedExport {
  pub job: ExportJob,
  /// Whether this call moved the job into the terminal status. Exactly one of
  /// several overlapping finishes of the same operation sees true.
  pub transitioned: bool,
}

/// Load of one exported kind into one destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LoadJob {
  pub workflow_id: String,
  pub kind: String,
  pub destination_project_id: String,
  pub destination_dataset_id: String,
  /// Set once the load provider accepted the job.
  pub provider_job_id: Option<String>,
  pub status: JobStatus,
  pub status_check_count: u32,
  pub response_message: Option<String>,
  pub change_status_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl LoadJob {
  pub fn new(
    workflow_id: impl Into<String>,
    kind: impl Into<String>,
    destination_project_id: impl Into<String>,
    destination_dataset_id: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      workflow_id: workflow_id.into(),
      kind: kind.into(),
      destination_project_id: destination_project_id.into(),
      destination_dataset_id: destination_dataset_id.into(),
      provider_job_id: None,
      status: JobStatus::Created,
      status_check_count: 0,
      response_message: None,
      change_status_at: now,
      created_at: now,
      updated_at: now,
    }
  }

  /// Natural key used in errors and logs.
  pub fn key(&self) -> String {
    load_key(&self.workflow_id, &self.kind)
  }

  pub(crate) fn start(&mut self, provider_job_id: &str, now: DateTime<Utc>) -> Result<(), Error> {
    match self.status {
      JobStatus::Created => {
        self.provider_job_id = Some(provider_job_id.to_string());
        self.status = JobStatus::Running;
        self.change_status_at = now;
        Ok(())
      }
      JobStatus::Running if self.provider_job_id.as_deref() == Some(provider_job_id) => Ok(()),
      from => Err(Error::InvalidTransition {
        key: self.key(),
        from,
        to: JobStatus::Running,
      }),
    }
  }

  pub(crate) fn finish(
    &mut self,
    status: JobStatus,
    message: &str,
    now: DateTime<Utc>,
  ) -> Result<(), Error> {
    let allowed = status.is_terminal() && (!self.status.is_terminal() || self.status == status);
    if !allowed {
      return Err(Error::InvalidTransition {
        key: self.key(),
        from: self.status,
        to: status,
      });
    }

    if self.status != status {
      self.status = status;
      self.change_status_at = now;
    }
    self.response_message = (!message.is_empty()).then(|| message.to_string());
    Ok(())
  }
}

pub(crate) fn load_key(workflow_id: &str, kind: &str) -> String {
  format!("{workflow_id}/{kind}")
}
