use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Session tokens are short-lived; the marketplace re-issues them on page
/// load and the client reconnects with a fresh one.
pub const SESSION_TOKEN_TTL_SECS: i64 = 900;

/// Load or generate the session-token signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/session_secret and shared with
/// the marketplace platform, which issues the tokens this server validates.
pub fn load_or_generate_session_secret(
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("session_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Session signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("Session key file has wrong size ({}), regenerating", key.len());
    }

    // Generate new 256-bit random key
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Session signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Load or generate the service token that gates the directory sync
/// endpoint. Stored hex-encoded in data_dir/service_token so operators can
/// copy it into the platform's configuration.
pub fn load_or_generate_service_token(
    data_dir: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let token_path = Path::new(data_dir).join("service_token");

    if token_path.exists() {
        let token = std::fs::read_to_string(&token_path)?;
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
        tracing::warn!("Service token file is empty, regenerating");
    }

    let token_bytes: [u8; 32] = rand::rng().random();
    let token = hex::encode(token_bytes);
    std::fs::write(&token_path, &token)?;
    tracing::info!("Service token generated at {}", token_path.display());
    Ok(token)
}

/// Issue a session token (15-minute expiry).
/// Claims: sub=user_id, name, email, iat, exp. In production the platform
/// mints these; the server-side issuer exists for tooling and tests.
pub fn issue_session_token(
    secret: &[u8],
    user_id: &str,
    display_name: &str,
    email: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.to_string(),
        email: email.to_string(),
        iat: now,
        exp: now + SESSION_TOKEN_TTL_SECS,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate a session token and return its claims.
pub fn validate_session_token(
    secret: &[u8],
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
