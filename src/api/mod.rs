//! # Marketplace API
//!
//! Axum router over [`Marketplace`]. User routes authenticate with a
//! Supabase-style bearer JWT; operator routes under `/api/admin` need the
//! configured admin role.
//!
//! | Route | Auth |
//! |-------|------|
//! | `GET /api/tasks?status=&limit=` | none |
//! | `GET /api/tasks/{id}` | none |
//! | `POST /api/tasks/{id}/claim` | user |
//! | `POST /api/tasks/{id}/submit-proof` | user |
//! | `POST /api/withdrawals` | user, verified email |
//! | `GET /api/users/{id}/balance` and `/claims`, `/transactions`, `/stats` | owner or admin |
//! | `GET /api/quiz/next`, `POST /api/quiz/answer` | user |
//! | `/api/admin/...` | admin |
//! | `GET /healthz`, `/readyz`, `/metrics` | none |
//!
//! Errors are JSON `{"error", "code", "retryable"}`. Storage faults are 503
//! with `Retry-After`.

pub(crate) mod middleware_auth;
mod routes_admin;
mod routes_health;
mod routes_quiz;
mod routes_tasks;
mod routes_users;
mod routes_wallet;

use crate::config::{AuthConfig, ServerConfig};
use crate::error::{ErrorKind, MarketError};
use crate::market::Marketplace;
use crate::prom_metrics;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Seconds a client should wait before retrying a storage fault.
const RETRY_AFTER_SECS: &str = "1";

pub struct AppState {
    pub market: Marketplace,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(market: Marketplace, auth: AuthConfig) -> Arc<Self> {
        Arc::new(AppState { market, auth })
    }
}

/// A [`MarketError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        ApiError(e)
    }
}

pub(crate) fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::CapacityExceeded | ErrorKind::InvalidStateTransition => StatusCode::CONFLICT,
        ErrorKind::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(err.kind());
        if status.is_server_error() {
            tracing::error!(error = %err, code = err.code(), "request failed");
        }
        let body = Json(serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
            "retryable": err.is_retryable(),
        }));
        let mut response = (status, body).into_response();
        if err.is_retryable() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

pub(crate) type ApiResult<T> = std::result::Result<T, ApiError>;

/// Plain `{"error", "code"}` response for failures raised by the HTTP layer
/// itself (auth, ownership).
pub(crate) fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message, "code": code, "retryable": false})),
    )
        .into_response()
}

/// Records request duration, propagates or assigns `x-request-id`, and runs
/// the request inside a tracing span.
async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = req.method().to_string();
    let raw_path = req.uri().path().to_string();
    let start = std::time::Instant::now();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %raw_path,
    );
    let mut response = next.run(req).instrument(span).await;

    state
        .market
        .metrics()
        .http_request_duration
        .get_or_create(&prom_metrics::HttpLabel {
            method,
            path: normalize_path(&raw_path),
        })
        .observe(start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Collapse UUID and numeric path segments so histogram labels stay bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.is_empty() {
                seg.to_string()
            } else if seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else if uuid::Uuid::parse_str(seg).is_ok() {
                ":uuid".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn build_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(routes_health::handler_healthz))
        .route("/readyz", get(routes_health::handler_readyz))
        .route("/metrics", get(routes_health::handler_metrics))
        .route("/api/tasks", get(routes_tasks::handler_tasks_list))
        .route("/api/tasks/{id}", get(routes_tasks::handler_task_get))
        .route("/api/tasks/{id}/claim", post(routes_tasks::handler_task_claim))
        .route(
            "/api/tasks/{id}/submit-proof",
            post(routes_tasks::handler_task_submit_proof),
        )
        .route("/api/withdrawals", post(routes_wallet::handler_withdrawal_request))
        .route("/api/users/{id}/balance", get(routes_users::handler_balance))
        .route("/api/users/{id}/claims", get(routes_users::handler_claims))
        .route(
            "/api/users/{id}/transactions",
            get(routes_users::handler_transactions),
        )
        .route("/api/users/{id}/stats", get(routes_users::handler_stats))
        .route("/api/quiz/next", get(routes_quiz::handler_quiz_next))
        .route("/api/quiz/answer", post(routes_quiz::handler_quiz_answer))
        .route("/api/admin/tasks", post(routes_admin::handler_task_create))
        .route(
            "/api/admin/tasks/{id}/status",
            post(routes_admin::handler_task_status),
        )
        .route(
            "/api/admin/claims/{id}/approve",
            post(routes_admin::handler_claim_approve),
        )
        .route(
            "/api/admin/claims/{id}",
            delete(routes_admin::handler_claim_purge),
        )
        .route(
            "/api/admin/withdrawals/pending",
            get(routes_admin::handler_withdrawals_pending),
        )
        .route(
            "/api/admin/withdrawals/{id}/settle",
            post(routes_admin::handler_withdrawal_settle),
        )
        .route(
            "/api/admin/users/{id}/status",
            post(routes_admin::handler_account_status),
        )
        .route(
            "/api/admin/users/{id}/adjust",
            post(routes_admin::handler_account_adjust),
        )
        .route(
            "/api/admin/users/{id}/reconcile",
            get(routes_admin::handler_reconcile),
        )
        .route("/api/admin/sweep", post(routes_admin::handler_sweep))
        .route("/api/admin/events", get(routes_admin::handler_events));

    if let Some(dir) = &server.static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(CatchPanicLayer::new())
    .layer(axum::middleware::from_fn_with_state(
        state.clone(),
        metrics_middleware,
    ))
    .layer(TraceLayer::new_for_http())
    .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
    .layer(TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        server.request_timeout(),
    ))
    .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn normalize_path_keeps_static_segments() {
        assert_eq!(normalize_path("/api/tasks"), "/api/tasks");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn normalize_path_collapses_ids() {
        assert_eq!(
            normalize_path("/api/tasks/550e8400-e29b-41d4-a716-446655440000/claim"),
            "/api/tasks/:uuid/claim"
        );
        assert_eq!(normalize_path("/api/quiz/42"), "/api/quiz/:id");
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (MarketError::TaskNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (MarketError::TaskFull(Uuid::nil()), StatusCode::CONFLICT),
            (MarketError::AlreadyCompleted(Uuid::nil()), StatusCode::CONFLICT),
            (MarketError::EmptyProof, StatusCode::BAD_REQUEST),
            (MarketError::Storage("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(err.kind()), status, "{}", err);
        }
    }

    #[test]
    fn storage_faults_carry_retry_after() {
        let response = ApiError(MarketError::Storage("pool timed out".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = ApiError(MarketError::EmptyProof).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
