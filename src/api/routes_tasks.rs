//! Task catalog reads, claiming and proof submission.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::{ApiResult, AppState};
use crate::claims::ClaimOutcome;
use crate::market::clamp_limit;
use crate::model::TaskStatus;

#[derive(Deserialize)]
pub(super) struct TaskListQuery {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub(super) struct SubmitProofPayload {
    proof: String,
}

pub(super) async fn handler_tasks_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "all")
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let tasks = state
        .market
        .list_tasks(status, clamp_limit(query.limit))
        .await?;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

pub(super) async fn handler_task_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state.market.get_task(id).await?;
    Ok(Json(task))
}

/// 201 for a new reservation, 200 when the caller's active claim is resumed.
pub(super) async fn handler_task_claim(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id, _): RequireAuth,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (claim, outcome) = state.market.claim_task(user_id, id).await?;
    let status = match outcome {
        ClaimOutcome::Created => StatusCode::CREATED,
        ClaimOutcome::Resumed => StatusCode::OK,
    };
    Ok((
        status,
        Json(serde_json::json!({ "claim": claim, "outcome": outcome })),
    ))
}

pub(super) async fn handler_task_submit_proof(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id, _): RequireAuth,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitProofPayload>,
) -> ApiResult<impl IntoResponse> {
    let submission = state
        .market
        .submit_proof(user_id, id, &payload.proof)
        .await?;
    Ok(Json(submission))
}
