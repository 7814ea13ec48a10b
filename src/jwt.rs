//! Signed access token generation and validation.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Signature algorithm used when issuing tokens.
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Algorithms accepted on validation. Anything outside the HMAC family is rejected
/// before the signature is checked.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Wire claims of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user GUID)
    pub sub: String,
    /// Session identifier the token is bound to
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Typed view of a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject: Uuid,
    pub session_id: String,
    /// Expiration time (Unix timestamp)
    pub expires_at: u64,
}

/// Errors raised by token and refresh secret operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("hashing failure: {0}")]
    Hashing(String),
    #[error("system time error or expiry out of range")]
    Time,
}

impl TokenError {
    /// Validation failures the caller only ever sees as "unauthorized".
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TokenError::InvalidSignature | TokenError::Expired | TokenError::Malformed
        )
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                TokenError::InvalidSignature
            }
            _ => TokenError::Malformed,
        }
    }
}

/// HMAC keys and lifetime for access tokens.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret and access token lifetime.
    pub fn new(secret: &[u8], access_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
        }
    }

    /// Generate an access token bound to a user and a session.
    pub fn generate_access_token(&self, guid: Uuid, session_id: &str) -> Result<String, TokenError> {
        let now = unix_now()?;

        let claims = AccessClaims {
            sub: guid.to_string(),
            jti: session_id.to_string(),
            iat: now,
            exp: now
                .checked_add(self.access_ttl.as_secs())
                .ok_or(TokenError::Time)?,
        };

        jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Validate signature, algorithm and expiry of an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.decode(token, true)
    }

    /// Validate signature and algorithm but accept an expired token.
    /// Used on the refresh route, where an expired access token is the normal case.
    pub fn validate_signature_only(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.decode(token, false)
    }

    fn decode(&self, token: &str, check_expiry: bool) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_exp = check_expiry;

        let token_data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        let claims = token_data.claims;

        let subject = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Malformed)?;
        if claims.jti.is_empty() {
            return Err(TokenError::Malformed);
        }

        Ok(SessionClaims {
            subject,
            session_id: claims.jti,
            expires_at: claims.exp,
        })
    }
}

fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::Time)
}
