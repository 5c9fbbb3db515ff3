//! Ferry Provider
//!
//! Clients for the external systems a workflow drives: the document store's
//! bulk export facility, its kind catalog, and the warehouse's bulk load
//! jobs. Each is a trait so the orchestrator can be exercised against fakes;
//! the `Http*` types talk to the real REST endpoints.

mod bigquery;
mod client;
mod datastore;
mod error;
mod types;

pub use bigquery::HttpLoadProvider;
pub use client::ApiClient;
pub use datastore::{HttpExportProvider, HttpKindCatalog};
pub use error::ProviderError;
pub use types::{ExportMetadata, ExportParams, ExportStatus, LoadParams, LoadStatus};

use async_trait::async_trait;

/// Bulk export facility.
#[async_trait]
pub trait ExportProvider: Send + Sync {
  /// Start an export and return its operation handle.
  async fn export(&self, params: &ExportParams) -> Result<String, ProviderError>;

  /// Query the current state of an export operation.
  async fn status(&self, operation_id: &str) -> Result<ExportStatus, ProviderError>;
}

/// Enumerates the kinds of a project, skipping reserved names starting with `_`.
#[async_trait]
pub trait KindCatalog: Send + Sync {
  async fn list_kinds(&self, project_id: &str) -> Result<Vec<String>, ProviderError>;
}

/// Bulk load facility.
#[async_trait]
pub trait LoadProvider: Send + Sync {
  /// Submit a load job. Returns the job ID, which is `params.job_id`.
  async fn start(&self, params: &LoadParams) -> Result<String, ProviderError>;

  /// Query the current state of a load job.
  async fn status(&self, project_id: &str, job_id: &str) -> Result<LoadStatus, ProviderError>;
}
