//! Token lifecycle endpoints.
//!
//! - GET `/auth?guid=` - Issue a token pair, creating the user if no guid is given
//! - POST `/refresh` - Exchange a refresh token for a new pair (rotation)
//! - POST `/me` - Return the guid of the access token's subject
//! - POST `/deauthorize` - Revoke the current session

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::error::ApiError;
use crate::auth::{Auth, ClientFingerprint, RefreshAuth};
use crate::cli::IpExtractor;
use crate::impl_has_auth_backend;
use crate::issuer::TokenIssuer;
use crate::service::{AuthService, TokenPair, parse_guid};

#[derive(Clone)]
pub struct TokensState {
    pub service: AuthService,
    pub issuer: Arc<dyn TokenIssuer>,
    pub ip_extractor: Option<IpExtractor>,
}

impl_has_auth_backend!(TokensState);

pub fn router(state: TokensState) -> Router {
    Router::new()
        .route("/auth", get(authorize))
        .route("/refresh", post(refresh))
        .route("/me", post(me))
        .route("/deauthorize", post(deauthorize))
        .with_state(state)
}

#[derive(Deserialize)]
struct AuthorizeQuery {
    guid: Option<String>,
}

#[derive(Deserialize)]
struct RefreshRequest {
    guid: Option<Uuid>,
    refresh_token: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

#[derive(Serialize)]
struct MeResponse {
    guid: Uuid,
}

/// Issue a token pair. Without a guid a new user is created.
async fn authorize(
    State(state): State<TokensState>,
    ClientFingerprint(fingerprint): ClientFingerprint,
    Query(query): Query<AuthorizeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let guid = match query.guid.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(parse_guid(raw)?),
    };

    let pair = state
        .service
        .authorize(guid, &fingerprint.user_agent, &fingerprint.ip)
        .await?;

    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Rotate the session. The guid and session id come from the bearer token.
async fn refresh(
    State(state): State<TokensState>,
    RefreshAuth(claims): RefreshAuth,
    ClientFingerprint(fingerprint): ClientFingerprint,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(guid) = request.guid.filter(|guid| *guid != claims.subject) {
        warn!(token_guid = %claims.subject, body_guid = %guid, "Refresh guid does not match token");
        return Err(ApiError::Unauthorized);
    }

    let pair = state
        .service
        .refresh(
            claims.subject,
            &claims.session_id,
            &request.refresh_token,
            &fingerprint.user_agent,
            &fingerprint.ip,
        )
        .await?;

    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

async fn me(Auth(claims): Auth) -> impl IntoResponse {
    Json(MeResponse {
        guid: claims.subject,
    })
}

/// Delete the session. The access token stays usable until it expires.
async fn deauthorize(
    State(state): State<TokensState>,
    Auth(claims): Auth,
) -> Result<impl IntoResponse, ApiError> {
    state.service.deauthorize(claims.subject).await?;
    Ok(StatusCode::NO_CONTENT)
}
