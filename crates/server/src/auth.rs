//! Session authentication.
//!
//! Callers present an opaque session token, either as a bearer header or
//! an `X-Session-Token` header. The token resolves to a user through the
//! store; anything else is `unauthenticated`.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use chomp_core::ChompError;
use chomp_store::UserRow;

use crate::api::ApiError;
use crate::state::AppState;

/// The authenticated caller, resolved from the session token.
pub struct CurrentUser(pub UserRow);

fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    parts
        .headers
        .get("x-session-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)
            .ok_or_else(|| ChompError::Unauthenticated("missing session token".to_string()))?;

        let user = state
            .store()
            .user_for_session(&token)
            .await
            .map_err(ChompError::from)?
            .ok_or_else(|| ChompError::Unauthenticated("invalid session token".to_string()))?;

        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: &str, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(header, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn bearer_header_wins() {
        let parts = parts_with("authorization", "Bearer tok-123");
        assert_eq!(token_from_parts(&parts).as_deref(), Some("tok-123"));
    }

    #[test]
    fn session_header_fallback() {
        let parts = parts_with("x-session-token", "tok-456");
        assert_eq!(token_from_parts(&parts).as_deref(), Some("tok-456"));
    }

    #[test]
    fn missing_token_is_none() {
        let (parts, _) = Request::builder().body(()).unwrap().into_parts();
        assert!(token_from_parts(&parts).is_none());
    }
}
