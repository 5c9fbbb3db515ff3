use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ProviderError;
use crate::types::{ExportMetadata, ExportParams, ExportStatus};
use crate::{ExportProvider, KindCatalog};

/// Document store admin API client implementing [`ExportProvider`].
#[derive(Debug, Clone)]
pub struct HttpExportProvider {
  client: ApiClient,
}

impl HttpExportProvider {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportEntitiesRequest<'a> {
  entity_filter: EntityFilter<'a>,
  output_url_prefix: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityFilter<'a> {
  #[serde(skip_serializing_if = "is_empty")]
  kinds: &'a [String],
  #[serde(skip_serializing_if = "is_empty")]
  namespace_ids: &'a [String],
}

fn is_empty(values: &&[String]) -> bool {
  values.is_empty()
}

/// A long-running operation resource.
#[derive(Debug, Deserialize)]
struct Operation {
  name: String,
  #[serde(default)]
  done: bool,
  error: Option<OperationError>,
  metadata: Option<OperationMetadata>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
  #[serde(default)]
  code: i64,
  #[serde(default)]
  message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationMetadata {
  #[serde(default)]
  output_url_prefix: String,
  #[serde(default)]
  progress_entities: Progress,
  #[serde(default)]
  progress_bytes: Progress,
  #[serde(default)]
  entity_filter: MetadataFilter,
}

/// Counters are int64 values, which the API encodes as JSON strings.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Progress {
  #[serde(default)]
  work_completed: Value,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataFilter {
  #[serde(default)]
  kinds: Vec<String>,
}

fn counter(value: &Value) -> i64 {
  match value {
    Value::Number(n) => n.as_i64().unwrap_or_default(),
    Value::String(s) => s.parse().unwrap_or_default(),
    _ => 0,
  }
}

impl Operation {
  fn into_status(self) -> ExportStatus {
    if !self.done {
      return ExportStatus::Running;
    }
    if let Some(error) = self.error {
      return ExportStatus::Failed {
        code: error.code,
        message: error.message,
      };
    }

    let metadata = self
      .metadata
      .filter(|m| !m.output_url_prefix.is_empty())
      .map(|m| ExportMetadata {
        output_url_prefix: m.output_url_prefix,
        entities_completed: counter(&m.progress_entities.work_completed),
        bytes_completed: counter(&m.progress_bytes.work_completed),
        kinds: m.entity_filter.kinds,
      });
    ExportStatus::Done { metadata }
  }
}

#[async_trait]
impl ExportProvider for HttpExportProvider {
  async fn export(&self, params: &ExportParams) -> Result<String, ProviderError> {
    let body = ExportEntitiesRequest {
      entity_filter: EntityFilter {
        kinds: &params.kinds,
        namespace_ids: &params.namespace_ids,
      },
      output_url_prefix: &params.output_url_prefix,
    };
    let path = format!("v1/projects/{}:export", params.project_id);
    let operation: Operation = self.client.post_json(&path, &body).await?;

    debug!(operation_id = %operation.name, kinds = ?params.kinds, "export operation created");
    Ok(operation.name)
  }

  async fn status(&self, operation_id: &str) -> Result<ExportStatus, ProviderError> {
    let operation: Operation = self.client.get_json(&format!("v1/{operation_id}")).await?;
    Ok(operation.into_status())
  }
}

/// Kind enumeration through a keys-only query over `__kind__`.
#[derive(Debug, Clone)]
pub struct HttpKindCatalog {
  client: ApiClient,
}

impl HttpKindCatalog {
  pub fn new(client: ApiClient) -> Self {
    Self { client }
  }
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
  batch: QueryResultBatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultBatch {
  #[serde(default)]
  entity_results: Vec<EntityResult>,
  end_cursor: Option<String>,
  #[serde(default)]
  more_results: String,
}

#[derive(Debug, Deserialize)]
struct EntityResult {
  entity: Entity,
}

#[derive(Debug, Deserialize)]
struct Entity {
  key: Key,
}

#[derive(Debug, Deserialize)]
struct Key {
  #[serde(default)]
  path: Vec<PathElement>,
}

#[derive(Debug, Deserialize)]
struct PathElement {
  name: Option<String>,
}

#[async_trait]
impl KindCatalog for HttpKindCatalog {
  async fn list_kinds(&self, project_id: &str) -> Result<Vec<String>, ProviderError> {
    let path = format!("v1/projects/{project_id}:runQuery");
    let mut kinds = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
      let mut query = json!({
        "kind": [{ "name": "__kind__" }],
        "projection": [{ "property": { "name": "__key__" } }],
      });
      if let Some(cursor) = &cursor {
        query["startCursor"] = json!(cursor);
      }
      let body = json!({ "partitionId": { "projectId": project_id }, "query": query });

      let response: RunQueryResponse = self.client.post_json(&path, &body).await?;
      let batch = response.batch;
      kinds.extend(
        batch
          .entity_results
          .into_iter()
          .filter_map(|result| result.entity.key.path.into_iter().last()?.name)
          .filter(|name| !name.starts_with('_')),
      );

      match (batch.more_results.as_str(), batch.end_cursor) {
        ("NOT_FINISHED" | "MORE_RESULTS_AFTER_LIMIT", Some(next)) if cursor.as_ref() != Some(&next) => {
          cursor = Some(next);
        }
        _ => break,
      }
    }

    debug!(project_id, count = kinds.len(), "listed kinds");
    Ok(kinds)
  }
}
