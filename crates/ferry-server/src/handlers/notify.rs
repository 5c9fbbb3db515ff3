//! Storage notification handler

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use ferry_orchestrator::{NotificationOutcome, StorageObject};

use crate::ctx::Ctx;
use crate::error::{ErrorResponse, orchestrator_error};

/// Handler for `POST /api/v1/storage-change-notify`
///
/// Receives pub/sub push deliveries for objects written by exports. Objects
/// that do not start a load are acknowledged with an `ignored` outcome.
#[tracing::instrument(skip_all)]
pub async fn handler(
  State(ctx): State<Ctx>,
  body: Bytes,
) -> Result<Json<NotificationOutcome>, ErrorResponse> {
  let object = StorageObject::from_push(&body).map_err(orchestrator_error)?;

  let outcome = ctx
    .orchestrator
    .handle_storage_notification(&object)
    .await
    .map_err(orchestrator_error)?;
  Ok(Json(outcome))
}
