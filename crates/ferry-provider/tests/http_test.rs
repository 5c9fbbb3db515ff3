//! HTTP adapter tests against a mock server.

use std::time::Duration;

use ferry_provider::{
  ApiClient, ExportParams, ExportProvider, ExportStatus, HttpExportProvider, HttpKindCatalog,
  HttpLoadProvider, KindCatalog, LoadParams, LoadProvider, LoadStatus, ProviderError,
};
use mockito::{Matcher, Server};
use serde_json::json;

fn client(server: &Server) -> ApiClient {
  ApiClient::new(server.url(), Duration::from_secs(5))
    .unwrap()
    .with_bearer_token(Some("test-token".to_string()))
}

fn export_params() -> ExportParams {
  ExportParams {
    project_id: "source".to_string(),
    kinds: vec!["Hoge".to_string(), "Fuga".to_string()],
    namespace_ids: vec![],
    output_url_prefix: "gs://bucket/exports/wf-1".to_string(),
  }
}

fn load_params() -> LoadParams {
  LoadParams {
    job_id: "ferry_wf_1_Fuga".to_string(),
    project_id: "dest".to_string(),
    dataset_id: "datastore".to_string(),
    table_id: "Fuga".to_string(),
    source_uri: "gs://bucket/exports/wf-1/all_namespaces/kind_Fuga/all_namespaces_kind_Fuga.export_metadata".to_string(),
  }
}

#[tokio::test]
async fn export_returns_operation_name() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("POST", "/v1/projects/source:export")
    .match_header("authorization", "Bearer test-token")
    .match_body(Matcher::Json(json!({
      "entityFilter": { "kinds": ["Hoge", "Fuga"] },
      "outputUrlPrefix": "gs://bucket/exports/wf-1"
    })))
    .with_status(200)
    .with_header("content-type", "application/json")
    .with_body(r#"{"name": "projects/source/operations/op-1"}"#)
    .expect(1)
    .create_async()
    .await;
  let provider = HttpExportProvider::new(client(&server));

  //* When
  let operation = provider.export(&export_params()).await;

  //* Then
  mock.assert_async().await;
  assert_eq!(operation.unwrap(), "projects/source/operations/op-1");
}

#[tokio::test]
async fn export_rejection_is_not_transient() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("POST", "/v1/projects/source:export")
    .with_status(400)
    .with_body(r#"{"error": {"code": 400, "message": "invalid kind", "status": "INVALID_ARGUMENT"}}"#)
    .create_async()
    .await;
  let provider = HttpExportProvider::new(client(&server));

  //* When
  let err = provider.export(&export_params()).await.unwrap_err();

  //* Then
  mock.assert_async().await;
  assert!(!err.is_transient());
  match err {
    ProviderError::Rejected { status, message } => {
      assert_eq!(status, 400);
      assert_eq!(message, "invalid kind");
    }
    other => panic!("unexpected error: {other:?}"),
  }
}

#[tokio::test]
async fn export_status_done_with_metadata() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("GET", "/v1/projects/source/operations/op-1")
    .with_status(200)
    .with_body(
      json!({
        "name": "projects/source/operations/op-1",
        "done": true,
        "metadata": {
          "outputUrlPrefix": "gs://bucket/exports/wf-1/2025-03-01T00:00:00_1",
          "progressEntities": { "workCompleted": "10" },
          "progressBytes": { "workCompleted": "2048" },
          "entityFilter": { "kinds": ["Hoge", "Fuga"] }
        }
      })
      .to_string(),
    )
    .create_async()
    .await;
  let provider = HttpExportProvider::new(client(&server));

  //* When
  let status = provider.status("projects/source/operations/op-1").await.unwrap();

  //* Then
  mock.assert_async().await;
  let ExportStatus::Done {
    metadata: Some(metadata),
  } = status
  else {
    panic!("expected done with metadata, got {status:?}");
  };
  assert_eq!(
    metadata.output_url_prefix,
    "gs://bucket/exports/wf-1/2025-03-01T00:00:00_1"
  );
  assert_eq!(metadata.entities_completed, 10);
}

#[tokio::test]
async fn export_status_server_error_is_transient() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("GET", "/v1/projects/source/operations/op-1")
    .with_status(503)
    .with_body("Service Unavailable")
    .create_async()
    .await;
  let provider = HttpExportProvider::new(client(&server));

  //* When
  let result = provider.status("projects/source/operations/op-1").await;

  //* Then
  mock.assert_async().await;
  assert!(result.unwrap_err().is_transient());
}

#[tokio::test]
async fn kind_catalog_pages_and_skips_reserved_names() {
  //* Given
  let mut server = Server::new_async().await;
  let first = server
    .mock("POST", "/v1/projects/source:runQuery")
    .match_body(Matcher::PartialJson(json!({
      "partitionId": { "projectId": "source" },
      "query": { "kind": [{ "name": "__kind__" }] }
    })))
    .with_status(200)
    .with_body(
      json!({
        "batch": {
          "entityResults": [
            { "entity": { "key": { "path": [{ "kind": "__kind__", "name": "Hoge" }] } } },
            { "entity": { "key": { "path": [{ "kind": "__kind__", "name": "_Internal" }] } } }
          ],
          "endCursor": "cursor-1",
          "moreResults": "NOT_FINISHED"
        }
      })
      .to_string(),
    )
    .expect(1)
    .create_async()
    .await;
  let second = server
    .mock("POST", "/v1/projects/source:runQuery")
    .match_body(Matcher::PartialJson(json!({
      "query": { "startCursor": "cursor-1" }
    })))
    .with_status(200)
    .with_body(
      json!({
        "batch": {
          "entityResults": [
            { "entity": { "key": { "path": [{ "kind": "__kind__", "name": "Fuga" }] } } }
          ],
          "endCursor": "cursor-2",
          "moreResults": "NO_MORE_RESULTS"
        }
      })
      .to_string(),
    )
    .expect(1)
    .create_async()
    .await;
  let catalog = HttpKindCatalog::new(client(&server));

  //* When
  let kinds = catalog.list_kinds("source").await.unwrap();

  //* Then
  second.assert_async().await;
  first.assert_async().await;
  assert_eq!(kinds, vec!["Hoge", "Fuga"]);
}

#[tokio::test]
async fn load_start_submits_truncating_backup_load() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("POST", "/bigquery/v2/projects/dest/jobs")
    .match_body(Matcher::PartialJson(json!({
      "jobReference": { "projectId": "dest", "jobId": "ferry_wf_1_Fuga" },
      "configuration": {
        "load": {
          "sourceFormat": "DATASTORE_BACKUP",
          "writeDisposition": "WRITE_TRUNCATE",
          "destinationTable": { "projectId": "dest", "datasetId": "datastore", "tableId": "Fuga" }
        }
      }
    })))
    .with_status(200)
    .with_body(r#"{"jobReference": {"jobId": "ferry_wf_1_Fuga"}, "status": {"state": "PENDING"}}"#)
    .expect(1)
    .create_async()
    .await;
  let provider = HttpLoadProvider::new(client(&server));

  //* When
  let job_id = provider.start(&load_params()).await.unwrap();

  //* Then
  mock.assert_async().await;
  assert_eq!(job_id, "ferry_wf_1_Fuga");
}

#[tokio::test]
async fn load_start_duplicate_job_counts_as_accepted() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("POST", "/bigquery/v2/projects/dest/jobs")
    .with_status(409)
    .with_body(r#"{"error": {"code": 409, "message": "Already Exists: Job dest:ferry_wf_1_Fuga"}}"#)
    .expect(1)
    .create_async()
    .await;
  let provider = HttpLoadProvider::new(client(&server));

  //* When
  let job_id = provider.start(&load_params()).await;

  //* Then
  mock.assert_async().await;
  assert_eq!(job_id.unwrap(), "ferry_wf_1_Fuga");
}

#[tokio::test]
async fn load_status_reports_failure_reason() {
  //* Given
  let mut server = Server::new_async().await;
  let mock = server
    .mock("GET", "/bigquery/v2/projects/dest/jobs/ferry_wf_1_Fuga")
    .with_status(200)
    .with_body(
      json!({
        "status": {
          "state": "DONE",
          "errorResult": { "reason": "notFound", "message": "no such object" }
        }
      })
      .to_string(),
    )
    .create_async()
    .await;
  let provider = HttpLoadProvider::new(client(&server));

  //* When
  let status = provider.status("dest", "ferry_wf_1_Fuga").await.unwrap();

  //* Then
  mock.assert_async().await;
  assert_eq!(
    status,
    LoadStatus::Failed {
      message: "notFound: no such object".to_string()
    }
  );
}
