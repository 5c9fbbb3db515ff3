//! Workflow read-back handlers

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use ferry_orchestrator::WorkflowSummary;
use serde::Deserialize;

use crate::ctx::Ctx;
use crate::error::{ErrorResponse, RequestError, orchestrator_error};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  limit: Option<u32>,
}

/// Handler for `GET /api/v1/workflows/{id}`
///
/// Returns the export record, its load records and the derived state.
#[tracing::instrument(skip_all, fields(workflow_id = %id))]
pub async fn get_by_id(
  State(ctx): State<Ctx>,
  Path(id): Path<String>,
) -> Result<Json<WorkflowSummary>, ErrorResponse> {
  let summary = ctx
    .orchestrator
    .workflow(&id)
    .await
    .map_err(orchestrator_error)?;
  Ok(Json(summary))
}

/// Handler for `GET /api/v1/workflows?limit=N`
///
/// Most recently created workflows first. `limit` defaults to 50 and is
/// capped at 500.
#[tracing::instrument(skip_all)]
pub async fn get_all(
  State(ctx): State<Ctx>,
  params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<WorkflowSummary>>, ErrorResponse> {
  let Query(params) = params.map_err(|e| RequestError::Query(e.body_text()))?;
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

  let workflows = ctx
    .orchestrator
    .list_workflows(limit)
    .await
    .map_err(orchestrator_error)?;
  Ok(Json(workflows))
}
