//! Start request handler

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use ferry_config::{ExportRequest, ExportResponse};

use crate::ctx::Ctx;
use crate::error::{ErrorResponse, RequestError, orchestrator_error};

/// Handler for `POST /api/v1/export`
///
/// Starts one workflow per batch of requested kinds and returns their IDs.
/// The raw body is kept on every export record.
///
/// ## Response
/// - **200 OK**: every batch was accepted by the export provider
/// - **400 Bad Request**: unparseable body, missing `projectId` or
///   `outputLocation`, or nothing left to export
/// - **502 Bad Gateway**: the export provider refused a batch
/// - **503 Service Unavailable**: a provider, the store or the queue was unavailable
#[tracing::instrument(skip_all)]
pub async fn handler(
  State(ctx): State<Ctx>,
  body: Bytes,
) -> Result<Json<ExportResponse>, ErrorResponse> {
  let request: ExportRequest =
    serde_json::from_slice(&body).map_err(|e| RequestError::Body(e.to_string()))?;
  let request_body = String::from_utf8_lossy(&body);

  let response = ctx
    .orchestrator
    .start_export(&request, &request_body)
    .await
    .map_err(orchestrator_error)?;
  Ok(Json(response))
}
