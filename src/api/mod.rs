mod error;
mod tokens;

use axum::Router;
use std::sync::Arc;

use crate::cli::IpExtractor;
use crate::service::AuthService;

pub use error::ApiError;
pub use tokens::TokensState;

/// Create the API router. Bearer tokens are verified by the service's own issuer.
pub fn create_api_router(service: AuthService, ip_extractor: Option<IpExtractor>) -> Router {
    let tokens_state = TokensState {
        issuer: Arc::clone(service.issuer()),
        service,
        ip_extractor,
    };

    Router::new().merge(tokens::router(tokens_state))
}
