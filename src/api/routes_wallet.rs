//! Withdrawal requests. Settlement is reported through the admin routes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::middleware_auth::RequireAuth;
use super::{reject, ApiError, AppState};
use crate::model::Money;

#[derive(Deserialize)]
pub(super) struct WithdrawalPayload {
    amount: Money,
    destination: String,
}

pub(super) async fn handler_withdrawal_request(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id, user): RequireAuth,
    Json(payload): Json<WithdrawalPayload>,
) -> Response {
    if !user.email_verified {
        return reject(
            StatusCode::FORBIDDEN,
            "email_unverified",
            "A verified email is required to withdraw",
        );
    }
    match state
        .market
        .request_withdrawal(user_id, payload.amount, payload.destination)
        .await
    {
        Ok(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
