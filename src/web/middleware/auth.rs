//! JWT authentication middleware.
//!
//! Tokens are issued elsewhere; the vault only needs the user id in `sub`.
//! The tenant and role are always reloaded from the database.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::web::error::ApiError;
use crate::{Result, VaultError};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: i64,
    pub username: String,
    pub role: String,
    /// Issued at timestamp.
    pub iat: u64,
    /// Expiration timestamp.
    pub exp: u64,
    /// JWT ID (unique identifier).
    pub jti: String,
}

/// Keys for verifying (and, for tooling and tests, minting) bearer tokens.
#[derive(Clone)]
pub struct JwtState {
    pub decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    pub validation: Validation,
}

impl JwtState {
    /// Create a new JWT state from a secret key.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Sign a token for `user_id` valid for `ttl`.
    pub fn issue_token(
        &self,
        user_id: i64,
        username: &str,
        role: &str,
        ttl: Duration,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = JwtClaims {
            sub: user_id,
            username: username.to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| VaultError::Config(format!("failed to sign token: {e}")))
    }

    /// Decode and validate a token.
    pub fn verify(&self, token: &str) -> Option<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| tracing::debug!("JWT validation failed: {}", e))
            .ok()
            .map(|data| data.claims)
    }
}

/// Extractor for authenticated users.
///
/// Reads a `Bearer` token from the Authorization header, falling back to a
/// `token` query parameter so browser downloads can authenticate.
#[derive(Debug, Clone)]
pub struct AuthUser(pub JwtClaims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let token = parts
                .headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|header| header.strip_prefix("Bearer "))
                .map(|t| t.to_string());

            let token = match token {
                Some(t) => t,
                None => parts
                    .uri
                    .query()
                    .unwrap_or("")
                    .split('&')
                    .find_map(|pair| {
                        let (key, value) = pair.split_once('=')?;
                        if key == "token" {
                            urlencoding::decode(value).ok().map(|s| s.into_owned())
                        } else {
                            None
                        }
                    })
                    .ok_or_else(|| ApiError::unauthorized("Missing authorization"))?,
            };

            // Set by the jwt_auth middleware
            let jwt_state = parts
                .extensions
                .get::<Arc<JwtState>>()
                .ok_or_else(|| ApiError::internal("JWT state not configured"))?;

            jwt_state
                .verify(&token)
                .map(AuthUser)
                .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))
        })
    }
}

/// Middleware function to inject JWT state into request extensions.
pub async fn jwt_auth(
    jwt_state: Arc<JwtState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    request.extensions_mut().insert(jwt_state);
    next.run(request).await
}
