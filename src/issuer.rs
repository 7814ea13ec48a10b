//! Token issuing capability consumed by the auth service.

use std::time::Duration;
use uuid::Uuid;

use crate::jwt::{JwtConfig, SessionClaims, TokenError};
use crate::secret::{HashCost, RefreshSecret, SecretHasher};

/// Crypto operations for access tokens and refresh secrets. Stateless.
pub trait TokenIssuer: Send + Sync {
    fn generate_access_token(&self, guid: Uuid, session_id: &str) -> Result<String, TokenError>;

    fn validate_access_token(&self, token: &str) -> Result<SessionClaims, TokenError>;

    /// Signature and algorithm only. An expired token is accepted.
    fn validate_signature_only(&self, token: &str) -> Result<SessionClaims, TokenError>;

    fn generate_refresh_secret(&self) -> Result<RefreshSecret, TokenError>;

    /// Deliberately slow. Callers on an async runtime should run it on a blocking thread.
    fn hash_refresh_secret(&self, secret: &RefreshSecret) -> Result<String, TokenError>;

    fn compare_refresh_secret(&self, secret: &RefreshSecret, hash: &str) -> bool;

    fn encode_refresh_secret(&self, secret: &RefreshSecret) -> String {
        secret.encode()
    }

    fn decode_refresh_secret(&self, encoded: &str) -> Result<RefreshSecret, TokenError> {
        RefreshSecret::decode(encoded)
    }
}

/// Settings for the production issuer.
#[derive(Clone)]
pub struct IssuerConfig {
    pub jwt_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub hash_cost: HashCost,
}

/// HMAC JWT access tokens plus argon2id-hashed refresh secrets.
#[derive(Clone)]
pub struct Issuer {
    jwt: JwtConfig,
    hasher: SecretHasher,
}

impl Issuer {
    pub fn new(config: &IssuerConfig) -> Result<Self, TokenError> {
        Ok(Self {
            jwt: JwtConfig::new(&config.jwt_secret, config.access_ttl),
            hasher: SecretHasher::new(config.hash_cost)?,
        })
    }
}

impl TokenIssuer for Issuer {
    fn generate_access_token(&self, guid: Uuid, session_id: &str) -> Result<String, TokenError> {
        self.jwt.generate_access_token(guid, session_id)
    }

    fn validate_access_token(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.jwt.validate_access_token(token)
    }

    fn validate_signature_only(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.jwt.validate_signature_only(token)
    }

    fn generate_refresh_secret(&self) -> Result<RefreshSecret, TokenError> {
        RefreshSecret::generate()
    }

    fn hash_refresh_secret(&self, secret: &RefreshSecret) -> Result<String, TokenError> {
        self.hasher.hash(secret)
    }

    fn compare_refresh_secret(&self, secret: &RefreshSecret, hash: &str) -> bool {
        self.hasher.verify(secret, hash)
    }
}
