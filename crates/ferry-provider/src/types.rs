/// Parameters of one bulk export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportParams {
  pub project_id: String,
  pub kinds: Vec<String>,
  pub namespace_ids: Vec<String>,
  /// Storage prefix the export writes under.
  pub output_url_prefix: String,
}

/// Observed state of an export operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
  Running,
  Failed { code: i64, message: String },
  /// `metadata` is required downstream; a done operation without it is a
  /// protocol violation the caller must report.
  Done { metadata: Option<ExportMetadata> },
}

/// Metadata reported by a finished export.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportMetadata {
  pub output_url_prefix: String,
  pub entities_completed: i64,
  pub bytes_completed: i64,
  pub kinds: Vec<String>,
}

/// Parameters of one bulk load into a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams {
  /// Caller-chosen job ID; resubmitting the same ID is deduplicated.
  pub job_id: String,
  pub project_id: String,
  pub dataset_id: String,
  pub table_id: String,
  pub source_uri: String,
}

/// Observed state of a load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
  Running,
  Failed { message: String },
  Done,
}
