//! Per-user reads. Callers see their own data; admins see anyone's.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::{AuthUser, RequireCaller};
use super::{reject, ApiError, AppState};
use crate::market::clamp_limit;

#[derive(Deserialize)]
pub(super) struct LimitQuery {
    limit: Option<i64>,
}

fn forbid_others(caller: &AuthUser, user_id: Uuid) -> Option<Response> {
    (!caller.can_read(user_id)).then(|| {
        reject(
            StatusCode::FORBIDDEN,
            "forbidden",
            "Cannot read another user's account",
        )
    })
}

fn respond<T: serde::Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

pub(super) async fn handler_balance(
    State(state): State<Arc<AppState>>,
    RequireCaller(caller): RequireCaller,
    Path(user_id): Path<Uuid>,
) -> Response {
    if let Some(denied) = forbid_others(&caller, user_id) {
        return denied;
    }
    respond(state.market.balance(user_id).await.map(|account| {
        serde_json::json!({
            "user_id": account.user_id,
            "available_balance": account.available_balance,
            "total_earnings": account.total_earnings,
            "status": account.status,
        })
    }))
}

pub(super) async fn handler_claims(
    State(state): State<Arc<AppState>>,
    RequireCaller(caller): RequireCaller,
    Path(user_id): Path<Uuid>,
) -> Response {
    if let Some(denied) = forbid_others(&caller, user_id) {
        return denied;
    }
    respond(
        state
            .market
            .list_claims(user_id)
            .await
            .map(|claims| serde_json::json!({ "claims": claims })),
    )
}

pub(super) async fn handler_transactions(
    State(state): State<Arc<AppState>>,
    RequireCaller(caller): RequireCaller,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Response {
    if let Some(denied) = forbid_others(&caller, user_id) {
        return denied;
    }
    respond(
        state
            .market
            .list_transactions(user_id, clamp_limit(query.limit))
            .await
            .map(|txs| serde_json::json!({ "transactions": txs })),
    )
}

pub(super) async fn handler_stats(
    State(state): State<Arc<AppState>>,
    RequireCaller(caller): RequireCaller,
    Path(user_id): Path<Uuid>,
) -> Response {
    if let Some(denied) = forbid_others(&caller, user_id) {
        return denied;
    }
    respond(state.market.user_stats(user_id).await)
}
