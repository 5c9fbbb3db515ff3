//! Status check callbacks delivered by the task queue.
//!
//! Both handlers answer **409 Conflict** while the job is still running: the
//! next check has already been enqueued, so the delivery is acknowledged but
//! must not be retried. Any terminal or stale outcome answers **200 OK**.
//! 404 means the workflow is unknown; 5xx asks the queue to redeliver.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use ferry_config::{ExportCheckRequest, LoadCheckRequest};
use ferry_orchestrator::{ExportCheckOutcome, LoadCheckOutcome, Next};

use crate::ctx::Ctx;
use crate::error::{ErrorResponse, RequestError, orchestrator_error};

fn status_for(next: Next) -> StatusCode {
  match next {
    Next::Continue => StatusCode::CONFLICT,
    Next::Advance | Next::Stop => StatusCode::OK,
  }
}

/// Handler for `POST /api/v1/export-job-check`
#[tracing::instrument(skip_all)]
pub async fn export_check(
  State(ctx): State<Ctx>,
  body: Result<Json<ExportCheckRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ExportCheckOutcome>), ErrorResponse> {
  let Json(request) = body.map_err(|e| RequestError::Body(e.body_text()))?;

  let outcome = ctx
    .orchestrator
    .check_export(&request)
    .await
    .map_err(orchestrator_error)?;
  Ok((status_for(outcome.next()), Json(outcome)))
}

/// Handler for `POST /api/v1/load-job-check`
#[tracing::instrument(skip_all)]
pub async fn load_check(
  State(ctx): State<Ctx>,
  body: Result<Json<LoadCheckRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LoadCheckOutcome>), ErrorResponse> {
  let Json(request) = body.map_err(|e| RequestError::Body(e.body_text()))?;

  let outcome = ctx
    .orchestrator
    .check_load(&request)
    .await
    .map_err(orchestrator_error)?;
  Ok((status_for(outcome.next()), Json(outcome)))
}
