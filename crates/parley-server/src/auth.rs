use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use parley_core::UserId;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,
    #[error("invalid credentials: {0}")]
    Invalid(String),
}

/// Maps a bearer token (or `?jwt=` query value) to the user it identifies.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Treats the token itself as the user id.
///
/// Token issuance and verification live outside this service; deployments that
/// need signed tokens plug in their own resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughIdentity;

#[async_trait]
impl IdentityResolver for PassThroughIdentity {
    async fn resolve(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(AuthError::Invalid("token contains whitespace".into()));
        }
        Ok(UserId::from_raw(token))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Compare a presented shared secret against the configured one in constant
/// time. An empty configured secret never matches.
pub fn secret_matches(expected: &str, presented: &str) -> bool {
    !expected.is_empty() && constant_time_eq::constant_time_eq(expected.as_bytes(), presented.as_bytes())
}
