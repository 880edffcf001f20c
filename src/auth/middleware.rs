use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Session token claims, minted by the marketplace platform and extracted
/// here from the Authorization: Bearer header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID in the marketplace directory
    pub sub: String,
    /// Display name at token issue time
    pub name: String,
    /// Account email at token issue time
    pub email: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Extract Bearer token from Authorization header
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ChatError::AuthenticationFailure("missing Authorization header".into())
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ChatError::AuthenticationFailure("expected Bearer token".into()))?;

        // Get signing secret from request extensions (set by middleware layer)
        let secret = parts
            .extensions
            .get::<SessionSecret>()
            .ok_or_else(|| ChatError::Internal("session secret not injected".into()))?;

        crate::auth::token::validate_session_token(&secret.0, token)
            .map_err(|e| ChatError::AuthenticationFailure(e.to_string()))
    }
}

/// Signing secret stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct SessionSecret(pub Vec<u8>);
