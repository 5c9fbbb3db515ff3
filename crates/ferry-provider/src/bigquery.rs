use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LoadProvider;
use crate::client::ApiClient;
use crate::error::ProviderError;
use crate::types::{LoadParams, LoadStatus};

/// Warehouse jobs API client implementing [`LoadProvider`].
///
/// Loads read a document store export (`DATASTORE_BACKUP`) and replace the
/// destination table's contents.
#[derive(Debug, Clone)]
pub struct HttpLoadProvider {
  client: ApiClient,
}

impl HttpLoadProvider {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertJob<'a> {
  job_reference: JobReference<'a>,
  configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobReference<'a> {
  project_id: &'a str,
  job_id: &'a str,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
  load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
  source_uris: [&'a str; 1],
  source_format: &'static str,
  write_disposition: &'static str,
  destination_table: TableReference<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
  project_id: &'a str,
  dataset_id: &'a str,
  table_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct Job {
  status: Option<JobState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobState {
  #[serde(default)]
  state: String,
  error_result: Option<ErrorProto>,
  #[serde(default)]
  errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
  #[serde(default)]
  reason: String,
  #[serde(default)]
  message: String,
}

impl Job {
  fn into_status(self) -> Result<LoadStatus, ProviderError> {
    let state = self
      .status
      .ok_or_else(|| ProviderError::Malformed("job has no status".to_string()))?;

    match state.state.as_str() {
      "PENDING" | "RUNNING" => Ok(LoadStatus::Running),
      "DONE" => match state.error_result {
        None => Ok(LoadStatus::Done),
        Some(result) => {
          let details = state
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.reason, e.message))
            .collect::<Vec<_>>()
            .join("; ");
          let message = if details.is_empty() {
            format!("{}: {}", result.reason, result.message)
          } else {
            details
          };
          Ok(LoadStatus::Failed { message })
        }
      },
      other => Err(ProviderError::Malformed(format!("unknown job state '{other}'"))),
    }
  }
}

#[async_trait]
impl LoadProvider for HttpLoadProvider {
  async fn start(&self, params: &LoadParams) -> Result<String, ProviderError> {
    let body = InsertJob {
      job_reference: JobReference {
        project_id: &params.project_id,
        job_id: &params.job_id,
      },
      configuration: JobConfiguration {
        load: LoadConfiguration {
          source_uris: [params.source_uri.as_str()],
          source_format: "DATASTORE_BACKUP",
          write_disposition: "WRITE_TRUNCATE",
          destination_table: TableReference {
            project_id: &params.project_id,
            dataset_id: &params.dataset_id,
            table_id: &params.table_id,
          },
        },
      },
    };
    let path = format!("bigquery/v2/projects/{}/jobs", params.project_id);

    match self.client.post_json::<_, serde_json::Value>(&path, &body).await {
      Ok(_) => {}
      // The job ID was already used: an earlier submission of this load was accepted.
      Err(ProviderError::Rejected { status: 409, .. }) => {
        debug!(job_id = %params.job_id, "load job already exists");
      }
      Err(e) => return Err(e),
    }
    Ok(params.job_id.clone())
  }

  async fn status(&self, project_id: &str, job_id: &str) -> Result<LoadStatus, ProviderError> {
    let job: Job = self
      .client
      .get_json(&format!("bigquery/v2/projects/{project_id}/jobs/{job_id}"))
      .await?;
    job.into_status()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn job(body: serde_json::Value) -> Job {
    serde_json::from_value(body).unwrap()
  }

  #[test]
  fn test_pending_and_running_are_running() {
    for state in ["PENDING", "RUNNING"] {
      let status = job(json!({ "status": { "state": state } })).into_status().unwrap();
      assert_eq!(status, LoadStatus::Running);
    }
  }

  #[test]
  fn test_done_with_error_result_is_failed() {
    let status = job(json!({
      "status": {
        "state": "DONE",
        "errorResult": { "reason": "invalid", "message": "bad backup" },
        "errors": [
          { "reason": "invalid", "message": "bad backup" },
          { "reason": "notFound", "message": "no such object" }
        ]
      }
    }))
    .into_status()
    .unwrap();

    assert_eq!(
      status,
      LoadStatus::Failed {
        message: "invalid: bad backup; notFound: no such object".to_string()
      }
    );
  }

  #[test]
  fn test_missing_status_is_malformed() {
    let err = job(json!({})).into_status().unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
  }
}
