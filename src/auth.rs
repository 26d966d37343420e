//! Bearer token verification and the `Principal` extractors.
//!
//! Tokens are HS256 JWTs minted elsewhere with the shared secret. The `sub`
//! claim carries the principal id; `exp` is required and enforced.

use crate::{config::Secret, errors::AppError, models::principal::Principal};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed authorization header")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token subject `{0}` is not a valid principal id")]
    BadSubject(String),
}

/// Checks bearer tokens against the shared HS256 secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("decoding_key", &"[hidden]")
            .finish()
    }
}

impl TokenVerifier {
    pub fn new(secret: &Secret) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose().as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;

        Uuid::parse_str(&claims.sub)
            .map(Principal::new)
            .map_err(|_| AuthError::BadSubject(claims.sub))
    }

    /// `Ok(None)` when no `Authorization` header was sent at all.
    fn principal_from_parts(&self, parts: &Parts) -> Result<Option<Principal>, AuthError> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Malformed)?;
        self.verify(token).map(Some)
    }
}

/// Authenticated routes: a missing or bad token is rejected with 401.
impl<S> FromRequestParts<S> for Principal
where
    TokenVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        TokenVerifier::from_ref(state)
            .principal_from_parts(parts)?
            .ok_or_else(|| AuthError::Missing.into())
    }
}

/// `Option<Principal>`: anonymous callers pass through as `None`, but a token
/// that is present and invalid is still rejected.
impl<S> OptionalFromRequestParts<S> for Principal
where
    TokenVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(TokenVerifier::from_ref(state).principal_from_parts(parts)?)
    }
}

/// Mint a token the way the external issuer does. Tests only.
#[cfg(test)]
pub fn issue_token(secret: &str, sub: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let exp = (chrono::Utc::now().timestamp() + ttl_secs) as usize;
    let claims = Claims {
        sub: sub.to_string(),
        exp,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode token")
}
