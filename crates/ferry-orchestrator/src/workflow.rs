//! Read-only views over a workflow's records.

use ferry_store::{ExportJob, JobStatus, LoadJob};
use serde::Serialize;
use tracing::instrument;

use crate::error::OrchestratorError;
use crate::Orchestrator;

/// Phase a workflow is in, derived from its export and load records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
  /// The export has not finished yet.
  Exporting,
  /// The export is done and at least one load is not terminal.
  Loading,
  /// The export is done and every load is terminal.
  Completed,
  /// The export failed for good.
  Failed,
}

impl WorkflowState {
  pub fn derive(export: &ExportJob, loads: &[LoadJob]) -> Self {
    match export.status {
      JobStatus::Created | JobStatus::Running => WorkflowState::Exporting,
      JobStatus::Failed => WorkflowState::Failed,
      JobStatus::Done if loads.iter().all(|load| load.status.is_terminal()) => {
        WorkflowState::Completed
      }
      JobStatus::Done => WorkflowState::Loading,
    }
  }
}

/// An export record with its load records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
  pub state: WorkflowState,
  pub export: ExportJob,
  pub loads: Vec<LoadJob>,
}

impl WorkflowSummary {
  fn new(export: ExportJob, loads: Vec<LoadJob>) -> Self {
    Self {
      state: WorkflowState::derive(&export, &loads),
      export,
      loads,
    }
  }

  /// Loads that finished in `Failed`.
  pub fn failed_kinds(&self) -> Vec<&str> {
    self
      .loads
      .iter()
      .filter(|load| load.status == JobStatus::Failed)
      .map(|load| load.kind.as_str())
      .collect()
  }
}

impl Orchestrator {
  /// The export and load records of one workflow.
  #[instrument(name = "workflow_get", skip(self))]
  pub async fn workflow(&self, workflow_id: &str) -> Result<WorkflowSummary, OrchestratorError> {
    let export = self.deps.store.get_export(workflow_id).await?;
    let loads = self.deps.store.list_loads(workflow_id).await?;
    Ok(WorkflowSummary::new(export, loads))
  }

  /// The `limit` most recently created workflows, newest first.
  #[instrument(name = "workflow_list", skip(self))]
  pub async fn list_workflows(&self, limit: u32) -> Result<Vec<WorkflowSummary>, OrchestratorError> {
    let exports = self.deps.store.list_exports(limit).await?;
    let mut workflows = Vec::with_capacity(exports.len());
    for export in exports {
      let loads = self.deps.store.list_loads(&export.workflow_id).await?;
      workflows.push(WorkflowSummary::new(export, loads));
    }
    Ok(workflows)
  }
}
