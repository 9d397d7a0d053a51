//! Bearer-token `Auth` adapter plus the axum extractor that resolves a
//! request's session via `FromRequestParts`. Tokens are opaque and checked
//! against the configured shared secret; there is no user database in the
//! reference server, so a valid token resolves to a single admin session
//! and a missing header resolves to anonymous (roles empty, `is_admin: false`).

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use headway_core::{Result, SessionInfo};

use crate::AppState;

pub struct SecretAuth {
    secret: String,
}

impl SecretAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

#[async_trait]
impl headway_core::Auth for SecretAuth {
    async fn resolve(&self, credential: &str) -> Result<Option<SessionInfo>> {
        if credential.is_empty() {
            return Ok(None);
        }
        if credential == self.secret {
            return Ok(Some(SessionInfo {
                user_id: Some("admin".to_string()),
                roles: vec!["admin".to_string()],
                is_admin: true,
            }));
        }
        Ok(Some(SessionInfo {
            user_id: Some(credential.to_string()),
            roles: vec!["authenticated".to_string()],
            is_admin: false,
        }))
    }
}

/// Session extracted from the request's `Authorization` header. Missing
/// header resolves to anonymous rather than rejecting, since many
/// collections permit public reads; handlers that require auth check
/// `session.is_some()` or `session.is_admin` themselves.
#[derive(Debug, Clone, Default)]
pub struct Session(pub Option<SessionInfo>);

impl FromRequestParts<AppState> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(header) = header else {
            return Ok(Session(None));
        };

        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err((StatusCode::UNAUTHORIZED, "invalid authorization header format"));
        };

        if token.is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "empty bearer token"));
        }

        let session = state
            .auth
            .resolve(token)
            .await
            .map_err(|_| (StatusCode::UNAUTHORIZED, "failed to resolve session"))?;

        Ok(Session(session))
    }
}

/// Variant that rejects anonymous requests outright, for admin-only routes
/// (reindexing, migrations).
pub struct RequireAdmin(pub SessionInfo);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Session(session) = Session::from_request_parts(parts, state).await?;
        match session {
            Some(session) if session.is_admin => Ok(RequireAdmin(session)),
            Some(_) => Err((StatusCode::FORBIDDEN, "admin role required")),
            None => Err((StatusCode::UNAUTHORIZED, "missing authorization header")),
        }
    }
}
