//! Router tests: status codes and bodies of every route.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ferry_config::Settings;
use ferry_orchestrator::{Dependencies, Orchestrator};
use ferry_provider::{
  ExportMetadata, ExportParams, ExportProvider, ExportStatus, KindCatalog, LoadParams,
  LoadProvider, LoadStatus, ProviderError,
};
use ferry_queue::RecordingQueue;
use ferry_server::error::ErrorResponse;
use ferry_store::InMemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt as _;

/// Export provider replaying scripted status results; unscripted checks see Running.
#[derive(Default)]
struct ScriptedExports {
  statuses: Mutex<VecDeque<Result<ExportStatus, ProviderError>>>,
}

impl ScriptedExports {
  fn push(&self, status: Result<ExportStatus, ProviderError>) {
    self.statuses.lock().unwrap().push_back(status);
  }
}

#[async_trait]
impl ExportProvider for ScriptedExports {
  async fn export(&self, _params: &ExportParams) -> Result<String, ProviderError> {
    Ok("op-1".to_string())
  }

  async fn status(&self, _operation_id: &str) -> Result<ExportStatus, ProviderError> {
    self
      .statuses
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(Ok(ExportStatus::Running))
  }
}

struct NoKinds;

#[async_trait]
impl KindCatalog for NoKinds {
  async fn list_kinds(&self, _project_id: &str) -> Result<Vec<String>, ProviderError> {
    Ok(Vec::new())
  }
}

struct InstantLoads;

#[async_trait]
impl LoadProvider for InstantLoads {
  async fn start(&self, params: &LoadParams) -> Result<String, ProviderError> {
    Ok(params.job_id.clone())
  }

  async fn status(&self, _project_id: &str, _job_id: &str) -> Result<LoadStatus, ProviderError> {
    Ok(LoadStatus::Done)
  }
}

struct TestServer {
  app: Router,
  exports: Arc<ScriptedExports>,
  queue: Arc<RecordingQueue>,
}

fn create_test_server() -> TestServer {
  let exports = Arc::new(ScriptedExports::default());
  let queue = Arc::new(RecordingQueue::new());
  let deps = Dependencies {
    store: Arc::new(InMemoryStore::new()),
    exports: exports.clone(),
    kinds: Arc::new(NoKinds),
    loads: Arc::new(InstantLoads),
    queue: queue.clone(),
  };
  let orchestrator = Orchestrator::new(deps, Settings::default());

  TestServer {
    app: ferry_server::router(Arc::new(orchestrator)),
    exports,
    queue,
  }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let request = Request::builder().method(method).uri(uri);
  let request = match body {
    Some(body) => request
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap(),
    None => request.body(Body::empty()).unwrap(),
  };

  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, body)
}

fn error_code(body: Value) -> String {
  serde_json::from_value::<ErrorResponse>(body).unwrap().error_code
}

/// Start a single-kind workflow and return its export check payload.
async fn start_workflow(server: &TestServer) -> Value {
  let (status, body) = send(
    &server.app,
    "POST",
    "/api/v1/export",
    Some(json!({
      "projectId": "source",
      "kinds": ["Fuga"],
      "outputLocation": "gs://bucket/exports"
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["ids"][0]["providerOperationId"], "op-1");

  let tasks = server.queue.take().await;
  assert_eq!(tasks.len(), 1);
  tasks[0].body.clone()
}

#[tokio::test]
async fn test_health_endpoint() {
  let server = create_test_server();

  let request = Request::builder().uri("/").body(Body::empty()).unwrap();
  let response = server.app.clone().oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_export_rejects_bad_bodies() {
  let server = create_test_server();

  let request = Request::builder()
    .method("POST")
    .uri("/api/v1/export")
    .body(Body::from("{not json"))
    .unwrap();
  let response = server.app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);

  let (status, body) = send(
    &server.app,
    "POST",
    "/api/v1/export",
    Some(json!({ "kinds": ["Fuga"], "outputLocation": "gs://bucket" })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(error_code(body), "INVALID_REQUEST");
}

#[tokio::test]
async fn test_running_check_answers_conflict_then_done_answers_ok() {
  let server = create_test_server();
  let check = start_workflow(&server).await;

  let (status, body) = send(&server.app, "POST", "/api/v1/export-job-check", Some(check.clone())).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body, json!({ "outcome": "running", "status_check_count": 1 }));
  assert_eq!(server.queue.take().await.len(), 1);

  server.exports.push(Ok(ExportStatus::Done {
    metadata: Some(ExportMetadata {
      output_url_prefix: "gs://bucket/exports/out".to_string(),
      ..Default::default()
    }),
  }));
  let (status, body) = send(&server.app, "POST", "/api/v1/export-job-check", Some(check)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "outcome": "done", "loads_started": 1 }));

  let tasks = server.queue.take().await;
  let (status, body) = send(
    &server.app,
    "POST",
    "/api/v1/load-job-check",
    Some(tasks[0].body.clone()),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(
    body,
    json!({ "outcome": "finished", "status": "done", "workflow_complete": true })
  );
}

#[tokio::test]
async fn test_check_error_statuses() {
  let server = create_test_server();

  let (status, body) = send(
    &server.app,
    "POST",
    "/api/v1/export-job-check",
    Some(json!({ "workflowId": "missing", "providerOperationId": "op-1" })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(error_code(body), "WORKFLOW_NOT_FOUND");

  let (status, _) = send(
    &server.app,
    "POST",
    "/api/v1/load-job-check",
    Some(json!({ "workflowId": "missing" })),
  )
  .await;
  assert!(status.is_client_error());

  let check = start_workflow(&server).await;
  server.exports.push(Err(ProviderError::Unavailable {
    status: 503,
    message: "backend busy".to_string(),
  }));
  let (status, body) = send(&server.app, "POST", "/api/v1/export-job-check", Some(check.clone())).await;
  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(error_code(body), "TEMPORARILY_UNAVAILABLE");

  server.exports.push(Ok(ExportStatus::Done { metadata: None }));
  let (status, body) = send(&server.app, "POST", "/api/v1/export-job-check", Some(check)).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(error_code(body), "PROTOCOL_VIOLATION");
}

#[tokio::test]
async fn test_workflow_read_back() {
  let server = create_test_server();
  let check = start_workflow(&server).await;
  let workflow_id = check["workflowId"].as_str().unwrap();

  let (status, body) = send(&server.app, "GET", &format!("/api/v1/workflows/{workflow_id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["state"], "exporting");
  assert_eq!(body["export"]["status"], "running");
  assert_eq!(body["loads"][0]["kind"], "Fuga");

  let (status, body) = send(&server.app, "GET", "/api/v1/workflows?limit=10", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 1);

  let (status, _) = send(&server.app, "GET", "/api/v1/workflows/missing", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let (status, body) = send(&server.app, "GET", "/api/v1/workflows?limit=lots", None).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(error_code(body), "INVALID_QUERY");
}

#[tokio::test]
async fn test_storage_notifications() {
  let server = create_test_server();
  let object = json!({
    "bucket": "bucket",
    "name": "exports/0f8fad5b-d9cb-469f-a165-70867728950e/all_namespaces_kind_Fuga.export_metadata"
  });
  let push = json!({
    "message": { "data": STANDARD.encode(object.to_string()), "messageId": "1" },
    "subscription": "projects/p/subscriptions/s"
  });

  // Loads follow export completion by default.
  let (status, body) = send(&server.app, "POST", "/api/v1/storage-change-notify", Some(push)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["outcome"], "ignored");

  let (status, body) = send(
    &server.app,
    "POST",
    "/api/v1/storage-change-notify",
    Some(json!({ "message": { "data": "%%%" } })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(error_code(body), "INVALID_REQUEST");
}
