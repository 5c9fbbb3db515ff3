use serde::{Deserialize, Serialize};

/// Payload of an export status check delivered by the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCheckRequest {
  pub workflow_id: String,
  pub provider_operation_id: String,
}

/// Payload of a load status check delivered by the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCheckRequest {
  pub workflow_id: String,
  pub kind: String,
}

/// Route that receives [`ExportCheckRequest`] deliveries.
pub const EXPORT_CHECK_PATH: &str = "/api/v1/export-job-check";

/// Route that receives [`LoadCheckRequest`] deliveries.
pub const LOAD_CHECK_PATH: &str = "/api/v1/load-job-check";
