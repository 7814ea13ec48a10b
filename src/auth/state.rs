//! Authentication state trait and macro.

use crate::cli::IpExtractor;
use crate::issuer::TokenIssuer;

/// Trait for state types that provide token verification and IP extraction.
pub trait HasAuthBackend {
    fn issuer(&self) -> &dyn TokenIssuer;
    fn ip_extractor(&self) -> Option<&IpExtractor>;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `issuer: Arc<dyn TokenIssuer>`
/// - `ip_extractor: Option<IpExtractor>`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub issuer: Arc<dyn TokenIssuer>,
///     pub ip_extractor: Option<IpExtractor>,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn issuer(&self) -> &dyn $crate::issuer::TokenIssuer {
                self.issuer.as_ref()
            }
            fn ip_extractor(&self) -> Option<&$crate::cli::IpExtractor> {
                self.ip_extractor.as_ref()
            }
        }
    };
}
