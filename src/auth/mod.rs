//! Bearer-token authentication and client fingerprinting for API routes.
//!
//! Access tokens are stateless: a valid signature and expiry is all that is
//! checked here. Session binding is enforced by the auth service on refresh.

mod errors;
mod extractors;
mod ip;
mod state;

pub use errors::ApiAuthError;
pub use extractors::{Auth, ClientFingerprint, RefreshAuth, bearer_token};
pub use ip::extract_client_ip;
pub use state::HasAuthBackend;
