//! Ferry Store
//!
//! This crate provides the storage trait and implementations for the two
//! record kinds that make up a workflow: the export job and its per-kind load
//! jobs. Data is persisted to SQLite, or kept in memory for tests and
//! ephemeral runs.
//!
//! Every state transition ([`Store::start_export`],
//! [`Store::increment_export_check_count`], [`Store::finish_export`] and their
//! load counterparts) is a single read-modify-write transaction on the
//! record's natural key, so duplicate or concurrent invocations never corrupt
//! a record. Transitions on a missing key fail with [`Error::NotFound`].

mod memory;
mod retry;
mod sqlite;
mod types;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use types::{ExportJob, FinishedExport, JobStatus, LoadJob, ResponseMessage};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// The requested status change is not allowed from the record's current status.
  #[error("invalid transition for {key}: {from:?} -> {to:?}")]
  InvalidTransition {
    key: String,
    from: JobStatus,
    to: JobStatus,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
  /// Whether retrying the same operation right away may succeed.
  ///
  /// True for a busy or locked database, pool exhaustion and I/O failures.
  pub fn is_transient(&self) -> bool {
    match self {
      Error::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
      Error::Database(sqlx::Error::Database(db)) => db
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        // SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
        .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
      _ => false,
    }
  }
}

/// Storage trait for export and load job records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Create a new export job.
  async fn create_export(&self, job: &ExportJob) -> Result<(), Error>;

  /// Get an export job by workflow ID.
  async fn get_export(&self, workflow_id: &str) -> Result<ExportJob, Error>;

  /// List the most recently created export jobs.
  async fn list_exports(&self, limit: u32) -> Result<Vec<ExportJob>, Error>;

  /// Record a provider operation handle and move the job to `Running`.
  async fn start_export(
    &self,
    workflow_id: &str,
    operation_id: &str,
    retry_count: u32,
  ) -> Result<ExportJob, Error>;

  /// Count one poll that observed the export still running.
  async fn increment_export_check_count(&self, workflow_id: &str) -> Result<ExportJob, Error>;

  /// Capture the output location reported by a finished export.
  async fn record_export_output(
    &self,
    workflow_id: &str,
    output_url_prefix: &str,
  ) -> Result<ExportJob, Error>;

  /// Move the export to a terminal status and append the outcome message.
  ///
  /// Outcomes for an operation other than the latest one are ignored, and a
  /// job that is already terminal only accepts its own status again. Only the
  /// caller that performed the transition sees
  /// [`FinishedExport::transitioned`] set.
  async fn finish_export(
    &self,
    workflow_id: &str,
    operation_id: &str,
    status: JobStatus,
    message: &str,
  ) -> Result<FinishedExport, Error>;

  /// Create one `Created` load job per kind.
  async fn create_load_batch(
    &self,
    workflow_id: &str,
    kinds: &[String],
    destination_project_id: &str,
    destination_dataset_id: &str,
  ) -> Result<Vec<LoadJob>, Error>;

  /// Get a load job by its natural key.
  async fn get_load(&self, workflow_id: &str, kind: &str) -> Result<LoadJob, Error>;

  /// Record the provider job ID and move the load to `Running`.
  async fn start_load(
    &self,
    workflow_id: &str,
    kind: &str,
    provider_job_id: &str,
  ) -> Result<LoadJob, Error>;

  /// Count one poll that observed the load still running.
  async fn increment_load_check_count(&self, workflow_id: &str, kind: &str)
  -> Result<LoadJob, Error>;

  /// Move the load to a terminal status.
  async fn finish_load(
    &self,
    workflow_id: &str,
    kind: &str,
    status: JobStatus,
    message: &str,
  ) -> Result<LoadJob, Error>;

  /// List all load jobs of a workflow, ordered by kind.
  async fn list_loads(&self, workflow_id: &str) -> Result<Vec<LoadJob>, Error>;
}
