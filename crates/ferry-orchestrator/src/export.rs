//! Export phase: starting exports and polling them to completion.

use ferry_config::{ExportCheckRequest, ExportRequest, ExportResponse, LoadTrigger, WorkflowIds};
use ferry_provider::{ExportParams, ExportStatus};
use ferry_store::{ExportJob, JobStatus};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::OrchestratorError;
use crate::scheduler::Next;
use crate::Orchestrator;

/// Result of one export status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportCheckOutcome {
  /// The export is still running; the same check was enqueued again.
  Running { status_check_count: u32 },
  /// The export failed and a new export was issued and scheduled.
  Retried {
    provider_operation_id: String,
    retry_count: u32,
  },
  /// The export failed for good.
  Failed { message: String },
  /// The export finished; `loads_started` loads were submitted.
  Done { loads_started: usize },
  /// The callback no longer matches the record: a re-export superseded the
  /// operation, or the job already finished. Nothing was done.
  Stale,
}

impl ExportCheckOutcome {
  pub fn next(&self) -> Next {
    match self {
      ExportCheckOutcome::Running { .. } => Next::Continue,
      ExportCheckOutcome::Retried { .. } => Next::Advance,
      ExportCheckOutcome::Done { loads_started } if *loads_started > 0 => Next::Advance,
      _ => Next::Stop,
    }
  }
}

/// Per-workflow output prefix: each workflow writes under its own directory
/// so storage notifications can be traced back to it.
pub(crate) fn workflow_output_prefix(output_location: &str, workflow_id: &str) -> String {
  format!("{}/{}", output_location.trim_end_matches('/'), workflow_id)
}

fn export_params(job: &ExportJob) -> ExportParams {
  ExportParams {
    project_id: job.project_id.clone(),
    kinds: job.requested_kinds.0.clone(),
    namespace_ids: job.namespace_ids.0.clone(),
    output_url_prefix: workflow_output_prefix(&job.output_location, &job.workflow_id),
  }
}

/// Keep the first occurrence of every kind.
fn dedup_kinds(kinds: Vec<String>) -> Vec<String> {
  let mut unique: Vec<String> = Vec::with_capacity(kinds.len());
  for kind in kinds {
    if !unique.contains(&kind) {
      unique.push(kind);
    }
  }
  unique
}

impl Orchestrator {
  /// Start one workflow per batch of requested kinds.
  ///
  /// Batches are processed in order. A provider rejection fails that batch's
  /// workflow and the request; workflows of earlier batches keep running.
  #[instrument(
    name = "export_request",
    skip(self, request, request_body),
    fields(project_id = %request.project_id)
  )]
  pub async fn start_export(
    &self,
    request: &ExportRequest,
    request_body: &str,
  ) -> Result<ExportResponse, OrchestratorError> {
    if request.project_id.is_empty() {
      return Err(OrchestratorError::InvalidRequest("projectId is required".to_string()));
    }
    if request.output_location.is_empty() {
      return Err(OrchestratorError::InvalidRequest(
        "outputLocation is required".to_string(),
      ));
    }

    let kinds = if request.all_kinds {
      self.deps.kinds.list_kinds(&request.project_id).await?
    } else {
      request.kinds.clone()
    };
    let kinds = dedup_kinds(request.without_ignored(kinds));
    if kinds.is_empty() {
      return Err(OrchestratorError::InvalidRequest("no kinds to export".to_string()));
    }

    let dest_project_id = request
      .dest_project_id
      .clone()
      .filter(|p| !p.is_empty())
      .or_else(|| Some(self.settings.default_dest_project_id.clone()).filter(|p| !p.is_empty()))
      .unwrap_or_else(|| request.project_id.clone());
    let dest_dataset_id = request
      .dest_dataset_id
      .clone()
      .filter(|d| !d.is_empty())
      .unwrap_or_else(|| self.settings.default_dest_dataset_id.clone());

    let mut response = ExportResponse::default();
    for batch in kinds.chunks(self.settings.export_batch_size.max(1)) {
      let ids = self
        .start_batch(request, request_body, batch, &dest_project_id, &dest_dataset_id)
        .await?;
      response.ids.push(ids);
    }
    Ok(response)
  }

  async fn start_batch(
    &self,
    request: &ExportRequest,
    request_body: &str,
    batch: &[String],
    dest_project_id: &str,
    dest_dataset_id: &str,
  ) -> Result<WorkflowIds, OrchestratorError> {
    let workflow_id = uuid::Uuid::new_v4().to_string();
    let job = ExportJob::new(
      &workflow_id,
      &request.project_id,
      request.namespace_ids.clone(),
      batch.to_vec(),
      &request.output_location,
      request_body,
    );

    // The full load set is written before the provider call so the fan-out
    // width is fixed up front.
    self.deps.store.create_export(&job).await?;
    let load_kinds = request.load_kinds(batch);
    self
      .deps
      .store
      .create_load_batch(&workflow_id, &load_kinds, dest_project_id, dest_dataset_id)
      .await?;

    let operation_id = match self.deps.exports.export(&export_params(&job)).await {
      Ok(operation_id) => operation_id,
      Err(e) if e.is_transient() => return Err(e.into()),
      Err(e) => {
        let message = e.to_string();
        self
          .deps
          .store
          .finish_export(&workflow_id, "", JobStatus::Failed, &message)
          .await?;
        error!(workflow_id = %workflow_id, error = %message, "export_rejected");
        return Err(OrchestratorError::ExportRejected {
          workflow_id,
          source: e,
        });
      }
    };

    self
      .deps
      .store
      .start_export(&workflow_id, &operation_id, 0)
      .await?;
    let check = ExportCheckRequest {
      workflow_id: workflow_id.clone(),
      provider_operation_id: operation_id.clone(),
    };
    self.scheduler.export_check(&check, 0).await?;

    info!(
      workflow_id = %workflow_id,
      operation_id = %operation_id,
      kinds = ?batch,
      load_kinds = ?load_kinds,
      "export_started"
    );
    Ok(WorkflowIds {
      workflow_id,
      provider_operation_id: operation_id,
    })
  }

  /// Handle one delivery of an export status check.
  #[instrument(
    name = "export_check",
    skip(self, request),
    fields(
      workflow_id = %request.workflow_id,
      operation_id = %request.provider_operation_id,
    )
  )]
  pub async fn check_export(
    &self,
    request: &ExportCheckRequest,
  ) -> Result<ExportCheckOutcome, OrchestratorError> {
    let workflow_id = request.workflow_id.as_str();
    let operation_id = request.provider_operation_id.as_str();

    let job = self.deps.store.get_export(workflow_id).await?;
    if job.current_operation_id() != Some(operation_id) {
      info!(current = ?job.current_operation_id(), "export_check_stale");
      return Ok(ExportCheckOutcome::Stale);
    }
    if job.status.is_terminal() {
      info!(status = ?job.status, "export_check_after_finish");
      return Ok(ExportCheckOutcome::Stale);
    }

    match self.deps.exports.status(operation_id).await? {
      ExportStatus::Running => self.export_running(request, &job).await,
      ExportStatus::Failed { code, message } => {
        let message = format!("Code={code},Message={message}");
        self.export_failed(workflow_id, operation_id, message).await
      }
      ExportStatus::Done { metadata } => {
        let Some(metadata) = metadata else {
          error!("export_done_without_metadata");
          self
            .deps
            .store
            .finish_export(workflow_id, operation_id, JobStatus::Failed, "done without metadata")
            .await?;
          return Err(OrchestratorError::Protocol(format!(
            "export operation '{operation_id}' finished without metadata"
          )));
        };

        self
          .deps
          .store
          .record_export_output(workflow_id, &metadata.output_url_prefix)
          .await?;
        if self
          .finish_operation(workflow_id, operation_id, JobStatus::Done, "")
          .await?
          .is_none()
        {
          return Ok(ExportCheckOutcome::Stale);
        }
        info!(
          output_url_prefix = %metadata.output_url_prefix,
          entities = metadata.entities_completed,
          bytes = metadata.bytes_completed,
          "export_done"
        );

        let loads_started = match self.settings.load_trigger {
          LoadTrigger::ExportCompletion => self.start_loads(workflow_id).await?,
          LoadTrigger::StorageNotification => 0,
        };
        Ok(ExportCheckOutcome::Done { loads_started })
      }
    }
  }

  /// Finish the export's current operation. Returns the job only to the one
  /// delivery that moved it into `status`; every other delivery gets `None`
  /// and must not act on the outcome.
  async fn finish_operation(
    &self,
    workflow_id: &str,
    operation_id: &str,
    status: JobStatus,
    message: &str,
  ) -> Result<Option<ExportJob>, OrchestratorError> {
    match self
      .deps
      .store
      .finish_export(workflow_id, operation_id, status, message)
      .await
    {
      Ok(finished) if finished.transitioned => Ok(Some(finished.job)),
      Ok(finished) => {
        info!(status = ?finished.job.status, "export_check_after_finish");
        Ok(None)
      }
      Err(ferry_store::Error::InvalidTransition { from, .. }) if from.is_terminal() => {
        info!(status = ?from, "export_check_after_finish");
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn export_running(
    &self,
    request: &ExportCheckRequest,
    job: &ExportJob,
  ) -> Result<ExportCheckOutcome, OrchestratorError> {
    if self.settings.check_limit_reached(job.status_check_count) {
      let message = format!(
        "status check limit reached after {} checks",
        job.status_check_count
      );
      warn!(status_check_count = job.status_check_count, "export_check_limit_reached");
      let finished = self
        .finish_operation(
          &request.workflow_id,
          &request.provider_operation_id,
          JobStatus::Failed,
          &message,
        )
        .await?;
      return Ok(match finished {
        Some(_) => ExportCheckOutcome::Failed { message },
        None => ExportCheckOutcome::Stale,
      });
    }

    let job = self
      .deps
      .store
      .increment_export_check_count(&request.workflow_id)
      .await?;
    self
      .scheduler
      .export_check(request, job.status_check_count)
      .await?;

    info!(status_check_count = job.status_check_count, "export_check_running");
    Ok(ExportCheckOutcome::Running {
      status_check_count: job.status_check_count,
    })
  }

  /// Record a failed operation and re-export while attempts remain. Only the
  /// delivery that recorded the failure issues the re-export.
  async fn export_failed(
    &self,
    workflow_id: &str,
    operation_id: &str,
    message: String,
  ) -> Result<ExportCheckOutcome, OrchestratorError> {
    let Some(job) = self
      .finish_operation(workflow_id, operation_id, JobStatus::Failed, &message)
      .await?
    else {
      return Ok(ExportCheckOutcome::Stale);
    };

    let attempts = job.retry_count + 1;
    if attempts >= self.settings.max_export_attempts {
      error!(attempts, error = %message, "export_failed");
      return Ok(ExportCheckOutcome::Failed { message });
    }

    warn!(attempts, error = %message, "export_failed_retrying");
    // The failure is claimed, so a redelivery of this check is stale; a
    // re-export that cannot be issued ends the workflow.
    let operation_id = match self.deps.exports.export(&export_params(&job)).await {
      Ok(operation_id) => operation_id,
      Err(e) => {
        let message = e.to_string();
        error!(error = %message, "export_retry_rejected");
        self
          .deps
          .store
          .finish_export(workflow_id, "", JobStatus::Failed, &message)
          .await?;
        if e.is_transient() {
          return Err(e.into());
        }
        return Ok(ExportCheckOutcome::Failed { message });
      }
    };

    let retry_count = job.retry_count + 1;
    self
      .deps
      .store
      .start_export(workflow_id, &operation_id, retry_count)
      .await?;
    let check = ExportCheckRequest {
      workflow_id: workflow_id.to_string(),
      provider_operation_id: operation_id.clone(),
    };
    self.scheduler.export_check(&check, 0).await?;

    info!(new_operation_id = %operation_id, retry_count, "export_retried");
    Ok(ExportCheckOutcome::Retried {
      provider_operation_id: operation_id,
      retry_count,
    })
  }
}
