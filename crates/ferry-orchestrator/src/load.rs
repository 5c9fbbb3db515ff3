//! Load phase: one warehouse load per exported kind, and the fan-in check.

use ferry_config::LoadCheckRequest;
use ferry_provider::{LoadParams, LoadStatus};
use ferry_store::{JobStatus, LoadJob};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::error::OrchestratorError;
use crate::scheduler::Next;
use crate::Orchestrator;

/// Result of one load status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadCheckOutcome {
  /// The load is still running; the same check was enqueued again.
  Running { status_check_count: u32 },
  /// The load reached `status`. `workflow_complete` is true once every load
  /// of the workflow is terminal.
  Finished {
    status: JobStatus,
    workflow_complete: bool,
  },
}

impl LoadCheckOutcome {
  pub fn next(&self) -> Next {
    match self {
      LoadCheckOutcome::Running { .. } => Next::Continue,
      LoadCheckOutcome::Finished { .. } => Next::Stop,
    }
  }
}

/// Location of the export metadata file of one kind under an export's output prefix.
pub fn source_uri(output_url_prefix: &str, kind: &str) -> String {
  format!(
    "{}/all_namespaces/kind_{kind}/all_namespaces_kind_{kind}.export_metadata",
    output_url_prefix.trim_end_matches('/')
  )
}

/// Deterministic load job ID, so a resubmitted load is deduplicated by the
/// provider. Characters outside `[A-Za-z0-9_-]` become `_`.
pub fn load_job_id(workflow_id: &str, kind: &str) -> String {
  format!("ferry_{workflow_id}_{kind}")
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect()
}

impl Orchestrator {
  /// Submit a load for every load record of the workflow still in `Created`.
  ///
  /// Returns how many loads were accepted. Records in any other status are
  /// skipped, so fanning out twice is harmless.
  #[instrument(name = "load_fan_out", skip(self))]
  pub async fn start_loads(&self, workflow_id: &str) -> Result<usize, OrchestratorError> {
    let export = self.deps.store.get_export(workflow_id).await?;
    let Some(output_url_prefix) = export.output_url_prefix else {
      return Err(OrchestratorError::Protocol(format!(
        "workflow '{workflow_id}' has no export output to load from"
      )));
    };

    let loads = self.deps.store.list_loads(workflow_id).await?;
    if loads.is_empty() {
      info!(workflow_id, "workflow_completed");
      return Ok(0);
    }

    let mut started = 0;
    for load in loads.iter().filter(|load| load.status == JobStatus::Created) {
      let source = source_uri(&output_url_prefix, &load.kind);
      if self.start_load(load, &source).await? {
        started += 1;
      }
    }
    Ok(started)
  }

  /// Submit one load. Returns false if the provider refused it, in which
  /// case the load record is failed and the fan-in check runs.
  pub(crate) async fn start_load(
    &self,
    load: &LoadJob,
    source: &str,
  ) -> Result<bool, OrchestratorError> {
    let params = LoadParams {
      job_id: load_job_id(&load.workflow_id, &load.kind),
      project_id: load.destination_project_id.clone(),
      dataset_id: load.destination_dataset_id.clone(),
      table_id: load.kind.clone(),
      source_uri: source.to_string(),
    };

    let job_id = match self.deps.loads.start(&params).await {
      Ok(job_id) => job_id,
      Err(e) if e.is_transient() => return Err(e.into()),
      Err(e) => {
        warn!(
          workflow_id = %load.workflow_id,
          kind = %load.kind,
          error = %e,
          "load_rejected"
        );
        self
          .deps
          .store
          .finish_load(&load.workflow_id, &load.kind, JobStatus::Failed, &e.to_string())
          .await?;
        self.check_fan_in(&load.workflow_id).await?;
        return Ok(false);
      }
    };

    let load = self
      .deps
      .store
      .start_load(&load.workflow_id, &load.kind, &job_id)
      .await?;
    let check = LoadCheckRequest {
      workflow_id: load.workflow_id.clone(),
      kind: load.kind.clone(),
    };
    self.scheduler.load_check(&check, 0).await?;

    info!(
      workflow_id = %load.workflow_id,
      kind = %load.kind,
      job_id = %job_id,
      source = %source,
      "load_started"
    );
    Ok(true)
  }

  /// Handle one delivery of a load status check.
  #[instrument(
    name = "load_check",
    skip(self, request),
    fields(workflow_id = %request.workflow_id, kind = %request.kind)
  )]
  pub async fn check_load(
    &self,
    request: &LoadCheckRequest,
  ) -> Result<LoadCheckOutcome, OrchestratorError> {
    let load = self
      .deps
      .store
      .get_load(&request.workflow_id, &request.kind)
      .await?;
    let Some(job_id) = load.provider_job_id.as_deref() else {
      error!(status = ?load.status, "load_check_without_job");
      return Err(OrchestratorError::Protocol(format!(
        "load '{}' has no provider job to check",
        load.key()
      )));
    };

    if load.status.is_terminal() {
      info!(status = ?load.status, "load_check_after_finish");
      let workflow_complete = self.check_fan_in(&request.workflow_id).await?;
      return Ok(LoadCheckOutcome::Finished {
        status: load.status,
        workflow_complete,
      });
    }

    let (status, message) = match self
      .deps
      .loads
      .status(&load.destination_project_id, job_id)
      .await?
    {
      LoadStatus::Running if self.settings.check_limit_reached(load.status_check_count) => {
        warn!(status_check_count = load.status_check_count, "load_check_limit_reached");
        let message = format!(
          "status check limit reached after {} checks",
          load.status_check_count
        );
        (JobStatus::Failed, message)
      }
      LoadStatus::Running => {
        let load = self
          .deps
          .store
          .increment_load_check_count(&request.workflow_id, &request.kind)
          .await?;
        self
          .scheduler
          .load_check(request, load.status_check_count)
          .await?;

        info!(status_check_count = load.status_check_count, "load_check_running");
        return Ok(LoadCheckOutcome::Running {
          status_check_count: load.status_check_count,
        });
      }
      LoadStatus::Failed { message } => (JobStatus::Failed, message),
      LoadStatus::Done => (JobStatus::Done, String::new()),
    };

    let status = match self
      .deps
      .store
      .finish_load(&request.workflow_id, &request.kind, status, &message)
      .await
    {
      Ok(load) => {
        match load.status {
          JobStatus::Failed => warn!(error = %message, "load_failed"),
          _ => info!("load_done"),
        }
        load.status
      }
      // A concurrent delivery finished the load first; its status stands.
      Err(ferry_store::Error::InvalidTransition { from, .. }) if from.is_terminal() => {
        info!(status = ?from, "load_check_after_finish");
        from
      }
      Err(e) => return Err(e.into()),
    };

    let workflow_complete = self.check_fan_in(&request.workflow_id).await?;
    Ok(LoadCheckOutcome::Finished {
      status,
      workflow_complete,
    })
  }

  /// True once every load record of the workflow is `Done` or `Failed`.
  pub(crate) async fn check_fan_in(&self, workflow_id: &str) -> Result<bool, OrchestratorError> {
    let loads = self.deps.store.list_loads(workflow_id).await?;
    let complete = loads.iter().all(|load| load.status.is_terminal());
    if complete {
      let failed = loads
        .iter()
        .filter(|load| load.status == JobStatus::Failed)
        .count();
      info!(
        workflow_id,
        loads = loads.len(),
        done = loads.len() - failed,
        failed,
        "workflow_completed"
      );
    }
    Ok(complete)
  }
}
