//! JWT auth for marketplace routes.
//!
//! Reads the Supabase JWT from `Authorization: Bearer <token>`. `sub` is the
//! user id, `email_verified` (top level or inside `user_metadata`) is the
//! verified flag, and a `role` equal to `auth.admin_role` unlocks operator
//! routes.
//!
//! With `auth.jwt_secret` set tokens are verified as HS256; without it they
//! are decoded unverified (development mode).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{reject, AppState};
use crate::config::AuthConfig;

#[derive(Debug, Deserialize)]
struct SupabaseClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    role: String,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    user_metadata: Option<serde_json::Value>,
}

impl SupabaseClaims {
    fn email_verified(&self) -> bool {
        self.email_verified
            .or_else(|| {
                self.user_metadata
                    .as_ref()
                    .and_then(|m| m.get("email_verified"))
                    .and_then(|v| v.as_bool())
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    /// `None` for service tokens that carry no subject.
    pub user_id: Option<Uuid>,
    pub role: String,
    pub email_verified: bool,
    pub is_admin: bool,
}

impl AuthUser {
    /// Owners may read their own data; admins may read anyone's.
    pub fn can_read(&self, user_id: Uuid) -> bool {
        self.is_admin || self.user_id == Some(user_id)
    }
}

fn decode_jwt(token: &str, auth: &AuthConfig) -> Result<SupabaseClaims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[auth.audience.as_str()]);
    match &auth.jwt_secret {
        Some(secret) => {
            let key = DecodingKey::from_secret(secret.as_bytes());
            decode::<SupabaseClaims>(token, &key, &validation)
                .map(|data| data.claims)
                .map_err(|e| format!("JWT verification failed: {}", e))
        }
        None => {
            validation.insecure_disable_signature_validation();
            validation.validate_exp = false;
            decode::<SupabaseClaims>(token, &DecodingKey::from_secret(b""), &validation)
                .map(|data| data.claims)
                .map_err(|e| format!("JWT decode failed: {}", e))
        }
    }
}

pub fn extract_auth_user(auth: &AuthConfig, parts: &Parts) -> Option<AuthUser> {
    let header_value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header_value.strip_prefix("Bearer ")?;
    let claims = match decode_jwt(token, auth) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "rejected bearer token");
            return None;
        }
    };
    let user_id = match claims.sub.as_deref() {
        Some(sub) => Some(Uuid::parse_str(sub).ok()?),
        None => None,
    };
    Some(AuthUser {
        user_id,
        email_verified: claims.email_verified(),
        is_admin: claims.role == auth.admin_role,
        role: claims.role,
    })
}

fn unauthorized() -> Response {
    reject(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Authentication required",
    )
}

/// Any authenticated user with a subject. Yields the user id.
pub struct RequireAuth(pub Uuid, pub AuthUser);

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = extract_auth_user(&state.auth, parts).ok_or_else(unauthorized)?;
        let user_id = user.user_id.ok_or_else(unauthorized)?;
        Ok(RequireAuth(user_id, user))
    }
}

/// Any authenticated caller, with or without a subject. Handlers check
/// ownership through [`AuthUser::can_read`].
pub struct RequireCaller(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for RequireCaller {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        extract_auth_user(&state.auth, parts)
            .map(RequireCaller)
            .ok_or_else(unauthorized)
    }
}

/// Returns 401 without a valid token, 403 without the admin role.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = extract_auth_user(&state.auth, parts).ok_or_else(unauthorized)?;
        if !user.is_admin {
            return Err(reject(
                StatusCode::FORBIDDEN,
                "forbidden",
                "Admin access required",
            ));
        }
        Ok(RequireAdmin(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn auth(secret: Option<&str>) -> AuthConfig {
        AuthConfig {
            jwt_secret: secret.map(str::to_string),
            ..AuthConfig::default()
        }
    }

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn parts_with(token: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn verified_token_yields_user() {
        let user = Uuid::new_v4();
        let t = token(
            serde_json::json!({"sub": user.to_string(), "aud": "authenticated", "role": "authenticated",
                               "exp": exp(), "user_metadata": {"email_verified": true}}),
            "secret",
        );
        let auth_user = extract_auth_user(&auth(Some("secret")), &parts_with(&t)).unwrap();
        assert_eq!(auth_user.user_id, Some(user));
        assert!(auth_user.email_verified);
        assert!(!auth_user.is_admin);
        assert!(auth_user.can_read(user));
        assert!(!auth_user.can_read(Uuid::new_v4()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let t = token(
            serde_json::json!({"sub": Uuid::new_v4().to_string(), "aud": "authenticated", "exp": exp()}),
            "other",
        );
        assert!(extract_auth_user(&auth(Some("secret")), &parts_with(&t)).is_none());
        // Development mode accepts any signature.
        assert!(extract_auth_user(&auth(None), &parts_with(&t)).is_some());
    }

    #[test]
    fn service_role_is_admin() {
        let t = token(
            serde_json::json!({"role": "service_role", "aud": "authenticated", "exp": exp()}),
            "secret",
        );
        let auth_user = extract_auth_user(&auth(Some("secret")), &parts_with(&t)).unwrap();
        assert!(auth_user.is_admin);
        assert_eq!(auth_user.user_id, None);
        assert!(auth_user.can_read(Uuid::new_v4()));
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let t = token(
            serde_json::json!({"sub": "not-a-uuid", "aud": "authenticated", "exp": exp()}),
            "secret",
        );
        assert!(extract_auth_user(&auth(Some("secret")), &parts_with(&t)).is_none());
    }
}
