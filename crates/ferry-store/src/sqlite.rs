use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::retry::with_transient_retry;
use crate::types::load_key;
use crate::{Error, ExportJob, FinishedExport, JobStatus, LoadJob, Store};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url`, e.g. `sqlite://ferry.db`.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal)
      .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(Self::new(pool))
  }

  /// A private in-memory database, kept alive by a single pooled connection.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;
    Ok(Self::new(pool))
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  async fn update_export<F, R>(&self, workflow_id: &str, mutate: F) -> Result<(ExportJob, R), Error>
  where
    F: Fn(&mut ExportJob, DateTime<Utc>) -> Result<R, Error> + Send + Sync,
    R: Send,
  {
    let mutate = &mutate;
    with_transient_retry("update_export", move || async move {
      let mut tx = self.pool.begin().await?;
      // Take the write lock before reading so concurrent transitions wait on
      // busy_timeout instead of failing the read-to-write upgrade.
      sqlx::query("UPDATE export_jobs SET updated_at = updated_at WHERE workflow_id = ?")
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;
      let mut job = fetch_export(&mut tx, workflow_id)
        .await?
        .ok_or_else(|| Error::NotFound(workflow_id.to_string()))?;

      let now = Utc::now();
      let applied = mutate(&mut job, now)?;
      job.updated_at = now;

      sqlx::query(
        r#"
            UPDATE export_jobs
            SET provider_operation_ids = ?, status = ?, status_check_count = ?, retry_count = ?,
                response_messages = ?, output_url_prefix = ?, change_status_at = ?, updated_at = ?
            WHERE workflow_id = ?
            "#,
      )
      .bind(&job.provider_operation_ids)
      .bind(job.status)
      .bind(job.status_check_count)
      .bind(job.retry_count)
      .bind(&job.response_messages)
      .bind(&job.output_url_prefix)
      .bind(job.change_status_at)
      .bind(job.updated_at)
      .bind(&job.workflow_id)
      .execute(&mut *tx)
      .await?;

      tx.commit().await?;
      Ok::<_, Error>((job, applied))
    })
    .await
  }

  async fn update_load<F>(&self, workflow_id: &str, kind: &str, mutate: F) -> Result<LoadJob, Error>
  where
    F: Fn(&mut LoadJob, DateTime<Utc>) -> Result<(), Error> + Send + Sync,
  {
    let mutate = &mutate;
    with_transient_retry("update_load", move || async move {
      let mut tx = self.pool.begin().await?;
      sqlx::query("UPDATE load_jobs SET updated_at = updated_at WHERE workflow_id = ? AND kind = ?")
        .bind(workflow_id)
        .bind(kind)
        .execute(&mut *tx)
        .await?;
      let mut job = fetch_load(&mut tx, workflow_id, kind)
        .await?
        .ok_or_else(|| Error::NotFound(load_key(workflow_id, kind)))?;

      let now = Utc::now();
      mutate(&mut job, now)?;
      job.updated_at = now;

      sqlx::query(
        r#"
            UPDATE load_jobs
            SET provider_job_id = ?, status = ?, status_check_count = ?, response_message = ?,
                change_status_at = ?, updated_at = ?
            WHERE workflow_id = ? AND kind = ?
            "#,
      )
      .bind(&job.provider_job_id)
      .bind(job.status)
      .bind(job.status_check_count)
      .bind(&job.response_message)
      .bind(job.change_status_at)
      .bind(job.updated_at)
      .bind(&job.workflow_id)
      .bind(&job.kind)
      .execute(&mut *tx)
      .await?;

      tx.commit().await?;
      Ok::<_, Error>(job)
    })
    .await
  }
}

async fn fetch_export(
  tx: &mut Transaction<'_, Sqlite>,
  workflow_id: &str,
) -> Result<Option<ExportJob>, sqlx::Error> {
  sqlx::query_as(
    r#"
            SELECT workflow_id, project_id, namespace_ids, requested_kinds, output_location,
                   request_body, provider_operation_ids, status, status_check_count, retry_count,
                   response_messages, output_url_prefix, change_status_at, created_at, updated_at
            FROM export_jobs
            WHERE workflow_id = ?
            "#,
  )
  .bind(workflow_id)
  .fetch_optional(&mut **tx)
  .await
}

async fn fetch_load(
  tx: &mut Transaction<'_, Sqlite>,
  workflow_id: &str,
  kind: &str,
) -> Result<Option<LoadJob>, sqlx::Error> {
  sqlx::query_as(
    r#"
            SELECT workflow_id, kind, destination_project_id, destination_dataset_id,
                   provider_job_id, status, status_check_count, response_message,
                   change_status_at, created_at, updated_at
            FROM load_jobs
            WHERE workflow_id = ? AND kind = ?
            "#,
  )
  .bind(workflow_id)
  .bind(kind)
  .fetch_optional(&mut **tx)
  .await
}

fn map_insert_error(key: String) -> impl FnOnce(sqlx::Error) -> Error {
  move |e| match e {
    sqlx::Error::Database(db) if db.is_unique_violation() => Error::AlreadyExists(key),
    other => other.into(),
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_export(&self, job: &ExportJob) -> Result<(), Error> {
    with_transient_retry("create_export", move || async move {
      sqlx::query(
            r#"
            INSERT INTO export_jobs (workflow_id, project_id, namespace_ids, requested_kinds,
                output_location, request_body, provider_operation_ids, status, status_check_count,
                retry_count, response_messages, output_url_prefix, change_status_at, created_at,
                updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.workflow_id)
        .bind(&job.project_id)
        .bind(&job.namespace_ids)
        .bind(&job.requested_kinds)
        .bind(&job.output_location)
        .bind(&job.request_body)
        .bind(&job.provider_operation_ids)
        .bind(job.status)
        .bind(job.status_check_count)
        .bind(job.retry_count)
        .bind(&job.response_messages)
        .bind(&job.output_url_prefix)
        .bind(job.change_status_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error(job.workflow_id.clone()))?;

      Ok::<_, Error>(())
    })
    .await
  }

  async fn get_export(&self, workflow_id: &str) -> Result<ExportJob, Error> {
    with_transient_retry("get_export", move || async move {
      let mut tx = self.pool.begin().await?;
      let job = fetch_export(&mut tx, workflow_id).await?;
      tx.commit().await?;
      job.ok_or_else(|| Error::NotFound(workflow_id.to_string()))
    })
    .await
  }

  async fn list_exports(&self, limit: u32) -> Result<Vec<ExportJob>, Error> {
    with_transient_retry("list_exports", move || async move {
      let jobs: Vec<ExportJob> = sqlx::query_as(
        r#"
            SELECT workflow_id, project_id, namespace_ids, requested_kinds, output_location,
                   request_body, provider_operation_ids, status, status_check_count, retry_count,
                   response_messages, output_url_prefix, change_status_at, created_at, updated_at
            FROM export_jobs
            ORDER BY created_at DESC
            LIMIT ?
            "#,
      )
      .bind(limit)
      .fetch_all(&self.pool)
      .await?;

      Ok::<_, Error>(jobs)
    })
    .await
  }

  async fn start_export(
    &self,
    workflow_id: &str,
    operation_id: &str,
    retry_count: u32,
  ) -> Result<ExportJob, Error> {
    self
      .update_export(workflow_id, |job, now| {
        job.start(operation_id, retry_count, now)
      })
      .await
      .map(|(job, ())| job)
  }

  async fn increment_export_check_count(&self, workflow_id: &str) -> Result<ExportJob, Error> {
    self
      .update_export(workflow_id, |job, _| {
        job.status_check_count += 1;
        Ok(())
      })
      .await
      .map(|(job, ())| job)
  }

  async fn record_export_output(
    &self,
    workflow_id: &str,
    output_url_prefix: &str,
  ) -> Result<ExportJob, Error> {
    self
      .update_export(workflow_id, |job, _| {
        job.output_url_prefix = Some(output_url_prefix.to_string());
        Ok(())
      })
      .await
      .map(|(job, ())| job)
  }

  async fn finish_export(
    &self,
    workflow_id: &str,
    operation_id: &str,
    status: JobStatus,
    message: &str,
  ) -> Result<FinishedExport, Error> {
    let (job, transitioned) = self
      .update_export(workflow_id, |job, now| {
        job.finish(operation_id, status, message, now)
      })
      .await?;
    Ok(FinishedExport { job, transitioned })
  }

  async fn create_load_batch(
    &self,
    workflow_id: &str,
    kinds: &[String],
    destination_project_id: &str,
    destination_dataset_id: &str,
  ) -> Result<Vec<LoadJob>, Error> {
    with_transient_retry("create_load_batch", move || async move {
      let jobs: Vec<LoadJob> = kinds
        .iter()
        .map(|kind| {
          LoadJob::new(
            workflow_id,
            kind.as_str(),
            destination_project_id,
            destination_dataset_id,
          )
        })
        .collect();

      let mut tx = self.pool.begin().await?;
      for job in &jobs {
        sqlx::query(
            r#"
            INSERT INTO load_jobs (workflow_id, kind, destination_project_id, destination_dataset_id,
                provider_job_id, status, status_check_count, response_message, change_status_at,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.workflow_id)
        .bind(&job.kind)
        .bind(&job.destination_project_id)
        .bind(&job.destination_dataset_id)
        .bind(&job.provider_job_id)
        .bind(job.status)
        .bind(job.status_check_count)
        .bind(&job.response_message)
        .bind(job.change_status_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error(job.key()))?;
      }
      tx.commit().await?;

      Ok::<_, Error>(jobs)
    })
    .await
  }

  async fn get_load(&self, workflow_id: &str, kind: &str) -> Result<LoadJob, Error> {
    with_transient_retry("get_load", move || async move {
      let mut tx = self.pool.begin().await?;
      let job = fetch_load(&mut tx, workflow_id, kind).await?;
      tx.commit().await?;
      job.ok_or_else(|| Error::NotFound(load_key(workflow_id, kind)))
    })
    .await
  }

  async fn start_load(
    &self,
    workflow_id: &str,
    kind: &str,
    provider_job_id: &str,
  ) -> Result<LoadJob, Error> {
    self
      .update_load(workflow_id, kind, |job, now| job.start(provider_job_id, now))
      .await
  }

  async fn increment_load_check_count(
    &self,
    workflow_id: &str,
    kind: &str,
  ) -> Result<LoadJob, Error> {
    self
      .update_load(workflow_id, kind, |job, _| {
        job.status_check_count += 1;
        Ok(())
      })
      .await
  }

  async fn finish_load(
    &self,
    workflow_id: &str,
    kind: &str,
    status: JobStatus,
    message: &str,
  ) -> Result<LoadJob, Error> {
    self
      .update_load(workflow_id, kind, |job, now| job.finish(status, message, now))
      .await
  }

  async fn list_loads(&self, workflow_id: &str) -> Result<Vec<LoadJob>, Error> {
    with_transient_retry("list_loads", move || async move {
      let jobs: Vec<LoadJob> = sqlx::query_as(
        r#"
            SELECT workflow_id, kind, destination_project_id, destination_dataset_id,
                   provider_job_id, status, status_check_count, response_message,
                   change_status_at, created_at, updated_at
            FROM load_jobs
            WHERE workflow_id = ?
            ORDER BY kind ASC
            "#,
      )
      .bind(workflow_id)
      .fetch_all(&self.pool)
      .await?;

      Ok::<_, Error>(jobs)
    })
    .await
  }
}
