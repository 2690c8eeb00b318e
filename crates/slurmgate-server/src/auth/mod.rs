//! Bearer-token authentication.
//!
//! Tokens come from `Authorization: Bearer <token>` on REST calls and from
//! the `token` query parameter on WebSocket upgrades, where browsers cannot
//! set headers.

use crate::server::{ApiError, AppState};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use slurmgate_core::{create_token, verify_token, GateError, GateResult};
use tracing::debug;

/// Issues and verifies tokens with the server secret.
pub struct TokenVerifier {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl TokenVerifier {
    pub fn new(secret: Vec<u8>, ttl_secs: u64) -> Self {
        Self { secret, ttl_secs }
    }

    pub fn issue(&self, username: &str) -> String {
        create_token(&self.secret, username, self.ttl_secs)
    }

    /// Verify a token and return its principal.
    pub fn verify(&self, token: &str) -> GateResult<String> {
        verify_token(&self.secret, token).inspect_err(|e| debug!(error = %e, "token rejected"))
    }

    /// Principal from the `Authorization` header, else from `query_token`.
    pub fn verify_request(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> GateResult<String> {
        let header = headers
            .get(AUTHORIZATION)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| GateError::Token("authorization header is not ASCII".into()))
            })
            .transpose()?;
        match (header, query_token) {
            (Some(value), _) => {
                let token = parse_bearer(value).ok_or_else(|| {
                    GateError::Token("authorization header is not a bearer token".into())
                })?;
                self.verify(token)
            }
            (None, Some(token)) if !token.is_empty() => self.verify(token),
            _ => Err(GateError::Token("missing credentials".into())),
        }
    }
}

/// Extract the token from a `Bearer <token>` header value.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated principal of a REST request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let principal = state.verifier.verify_request(&parts.headers, None)?;
        Ok(AuthUser(principal))
    }
}
