//! Operator routes: catalog management, manual approval, purge, settlement,
//! account status, adjustments, reconciliation, sweep and the activity log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAdmin;
use super::{ApiResult, AppState};
use crate::market::clamp_limit;
use crate::model::{AccountStatus, Money, NewTask, TaskStatus};
use crate::withdrawals::Settlement;

#[derive(Deserialize)]
pub(super) struct TaskStatusPayload {
    status: TaskStatus,
}

#[derive(Deserialize)]
pub(super) struct AccountStatusPayload {
    status: AccountStatus,
}

#[derive(Deserialize)]
pub(super) struct AdjustPayload {
    amount: Money,
    description: String,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub(super) struct EventsQuery {
    #[serde(default)]
    since: u64,
    limit: Option<usize>,
}

pub(super) async fn handler_task_create(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<NewTask>,
) -> ApiResult<impl IntoResponse> {
    let created_by = admin
        .user_id
        .map(|id| id.to_string())
        .or(Some(admin.role));
    let task = state.market.create_task(payload, created_by).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub(super) async fn handler_task_status(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskStatusPayload>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.set_task_status(id, payload.status).await?))
}

pub(super) async fn handler_claim_approve(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.approve(id).await?))
}

pub(super) async fn handler_claim_purge(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let claim = state.market.purge_claim(id).await?;
    Ok(Json(serde_json::json!({ "purged": claim })))
}

pub(super) async fn handler_withdrawals_pending(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let pending = state
        .market
        .pending_withdrawals(clamp_limit(query.limit))
        .await?;
    Ok(Json(serde_json::json!({ "withdrawals": pending })))
}

/// Body is `{"outcome": "completed"}` or `{"outcome": "failed", "reason": "..."}`.
pub(super) async fn handler_withdrawal_settle(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(settlement): Json<Settlement>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.settle_withdrawal(id, &settlement).await?))
}

pub(super) async fn handler_account_status(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AccountStatusPayload>,
) -> ApiResult<impl IntoResponse> {
    state.market.ensure_account(user_id).await?;
    Ok(Json(
        state
            .market
            .set_account_status(user_id, payload.status)
            .await?,
    ))
}

pub(super) async fn handler_account_adjust(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<AdjustPayload>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .market
        .adjust(
            user_id,
            payload.amount,
            payload.description,
            payload.idempotency_key.as_deref(),
        )
        .await?;
    let status = if outcome.is_fresh() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

pub(super) async fn handler_reconcile(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.reconcile(user_id).await?))
}

pub(super) async fn handler_sweep(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.sweep(Utc::now()).await?))
}

pub(super) async fn handler_events(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    Json(serde_json::json!({ "events": state.market.recent_events(query.since, limit) }))
}
