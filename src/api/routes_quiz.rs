//! Quiz questions and answers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::middleware_auth::RequireAuth;
use super::{ApiResult, AppState};

#[derive(Deserialize)]
pub(super) struct AnswerPayload {
    attempt_id: Uuid,
    question_id: String,
    choice: i32,
}

pub(super) async fn handler_quiz_next(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id, _): RequireAuth,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.market.next_question(user_id).await?))
}

pub(super) async fn handler_quiz_answer(
    State(state): State<Arc<AppState>>,
    RequireAuth(user_id, _): RequireAuth,
    Json(payload): Json<AnswerPayload>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .market
        .answer_question(
            user_id,
            payload.attempt_id,
            &payload.question_id,
            payload.choice,
        )
        .await?;
    Ok(Json(outcome))
}
