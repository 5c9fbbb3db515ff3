use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::load_key;
use crate::{Error, ExportJob, FinishedExport, JobStatus, LoadJob, Store};

/// In-memory store implementation.
///
/// Each map sits behind its own mutex, so every operation observes and
/// replaces a whole record atomically, the same guarantee the SQLite
/// transactions give. Suitable for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
  exports: Mutex<HashMap<String, ExportJob>>,
  loads: Mutex<BTreeMap<(String, String), LoadJob>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  async fn update_export<F, R>(&self, workflow_id: &str, mutate: F) -> Result<(ExportJob, R), Error>
  where
    F: FnOnce(&mut ExportJob, DateTime<Utc>) -> Result<R, Error> + Send,
  {
    let mut exports = self.exports.lock().await;
    let stored = exports
      .get_mut(workflow_id)
      .ok_or_else(|| Error::NotFound(workflow_id.to_string()))?;

    // Mutate a copy so a rejected transition leaves the record untouched.
    let mut job = stored.clone();
    let now = Utc::now();
    let applied = mutate(&mut job, now)?;
    job.updated_at = now;
    *stored = job.clone();
    Ok((job, applied))
  }

  async fn update_load<F>(&self, workflow_id: &str, kind: &str, mutate: F) -> Result<LoadJob, Error>
  where
    F: FnOnce(&mut LoadJob, DateTime<Utc>) -> Result<(), Error> + Send,
  {
    let mut loads = self.loads.lock().await;
    let stored = loads
      .get_mut(&(workflow_id.to_string(), kind.to_string()))
      .ok_or_else(|| Error::NotFound(load_key(workflow_id, kind)))?;

    let mut job = stored.clone();
    let now = Utc::now();
    mutate(&mut job, now)?;
    job.updated_at = now;
    *stored = job.clone();
    Ok(job)
  }
}

#[async_trait]
impl Store for InMemoryStore {
  async fn create_export(&self, job: &ExportJob) -> Result<(), Error> {
    let mut exports = self.exports.lock().await;
    if exports.contains_key(&job.workflow_id) {
      return Err(Error::AlreadyExists(job.workflow_id.clone()));
    }
    exports.insert(job.workflow_id.clone(), job.clone());
    Ok(())
  }

  async fn get_export(&self, workflow_id: &str) -> Result<ExportJob, Error> {
    self
      .exports
      .lock()
      .await
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(workflow_id.to_string()))
  }

  async fn list_exports(&self, limit: u32) -> Result<Vec<ExportJob>, Error> {
    let mut jobs: Vec<ExportJob> = self.exports.lock().await.values().cloned().collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(limit as usize);
    Ok(jobs)
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
    let mut loads = self.loads.lock().await;
    if let Some(kind) = kinds
      .iter()
      .find(|kind| loads.contains_key(&(workflow_id.to_string(), kind.to_string())))
    {
      return Err(Error::AlreadyExists(load_key(workflow_id, kind)));
    }

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
    for job in &jobs {
      loads.insert((job.workflow_id.clone(), job.kind.clone()), job.clone());
    }
    Ok(jobs)
  }

  async fn get_load(&self, workflow_id: &str, kind: &str) -> Result<LoadJob, Error> {
    self
      .loads
      .lock()
      .await
      .get(&(workflow_id.to_string(), kind.to_string()))
      .cloned()
      .ok_or_else(|| Error::NotFound(load_key(workflow_id, kind)))
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
    Ok(
      self
        .loads
        .lock()
        .await
        .values()
        .filter(|job| job.workflow_id == workflow_id)
        .cloned()
        .collect(),
    )
  }
}
