//! Shared test helpers for integration tests.

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use taskmarket::api::{self, AppState};
use taskmarket::config::Config;
use taskmarket::db::Database;
use taskmarket::quiz::QuestionBank;
use taskmarket::store::memory::MemoryStore;
use taskmarket::Marketplace;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "taskmarket-test-secret-0123456789abcdef";

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect to the test database, apply migrations and start from empty tables.
pub async fn setup_test_db() -> Database {
    let db = Database::connect(&test_db_url(), 10)
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to apply migrations");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql("TRUNCATE TABLE quiz_attempts, quiz_issues, transactions, claims, accounts, tasks CASCADE")
        .execute(pool)
        .await
        .unwrap();
}

/// Config with a fixed JWT secret and the background sweep disabled.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = Some(TEST_JWT_SECRET.to_string());
    config.market.sweep_interval_secs = 0;
    config
}

/// Router over a fresh in-memory store, with handles to the state and the
/// store so tests can reach past the HTTP layer.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
}

pub fn build_test_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let market = Marketplace::new(
        Arc::clone(&store) as Arc<dyn taskmarket::MarketStore>,
        config.market.clone(),
        QuestionBank::builtin(),
    );
    let state = AppState::new(market, config.auth.clone());
    let router = api::build_router(Arc::clone(&state), &config.server);
    TestApp {
        router,
        state,
        store,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

fn sign(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn expiry() -> i64 {
    (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp()
}

/// Bearer token for an ordinary user.
pub fn user_token(user_id: Uuid, email_verified: bool) -> String {
    sign(serde_json::json!({
        "sub": user_id.to_string(),
        "role": "authenticated",
        "aud": "authenticated",
        "email_verified": email_verified,
        "exp": expiry(),
    }))
}

/// Service-role token with no subject.
pub fn admin_token() -> String {
    sign(serde_json::json!({
        "role": "service_role",
        "aud": "authenticated",
        "exp": expiry(),
    }))
}
