//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::ip::extract_client_ip;
use super::state::HasAuthBackend;
use crate::jwt::SessionClaims;
use crate::store::Fingerprint;

/// Read the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Extractor for endpoints that require a valid, unexpired access token.
pub struct Auth(pub SessionClaims);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

        state
            .issuer()
            .validate_access_token(token)
            .map(Auth)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                ApiAuthError::new(AuthErrorKind::InvalidToken)
            })
    }
}

/// Extractor for the refresh endpoint. The access token must be correctly
/// signed, but it may have expired.
pub struct RefreshAuth(pub SessionClaims);

impl<S> FromRequestParts<S> for RefreshAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

        state
            .issuer()
            .validate_signature_only(token)
            .map(RefreshAuth)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected on refresh");
                ApiAuthError::new(AuthErrorKind::InvalidToken)
            })
    }
}

/// User agent and client IP of the request.
pub struct ClientFingerprint(pub Fingerprint);

impl<S> FromRequestParts<S> for ClientFingerprint
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(parts, state.ip_extractor()).map_err(|reason| {
            tracing::warn!(reason, "Could not determine client IP");
            ApiAuthError::new(AuthErrorKind::NoClientIp)
        })?;

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        Ok(ClientFingerprint(Fingerprint::new(user_agent, ip)))
    }
}
