use serde::{Deserialize, Serialize};

/// Request that starts one or more export-to-load workflows.
///
/// The kind list is split into batches; each batch becomes its own workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
  /// Project whose document store is exported.
  pub project_id: String,
  /// Export every kind reported by the kind catalog instead of `kinds`.
  pub all_kinds: bool,
  pub kinds: Vec<String>,
  pub namespace_ids: Vec<String>,
  /// Kinds removed before export.
  pub ignore_kinds: Vec<String>,
  /// Kinds that are exported but never loaded.
  pub ignore_load_kinds: Vec<String>,
  /// Object storage prefix the export is written under, e.g. `gs://bucket/exports`.
  pub output_location: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dest_project_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dest_dataset_id: Option<String>,
}

impl ExportRequest {
  /// Apply `ignore_kinds` to a resolved kind list, keeping order.
  pub fn without_ignored(&self, kinds: Vec<String>) -> Vec<String> {
    kinds
      .into_iter()
      .filter(|kind| !self.ignore_kinds.contains(kind))
      .collect()
  }

  /// Kinds of one export batch that should also be loaded.
  pub fn load_kinds(&self, batch: &[String]) -> Vec<String> {
    batch
      .iter()
      .filter(|kind| !self.ignore_load_kinds.contains(kind))
      .cloned()
      .collect()
  }
}

/// Identifiers of a workflow accepted by the export provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowIds {
  pub workflow_id: String,
  pub provider_operation_id: String,
}

/// Response to an [`ExportRequest`]: one entry per batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResponse {
  pub ids: Vec<WorkflowIds>,
}
