//! Opaque refresh secrets.
//!
//! A refresh secret is 32 random bytes handed to the client once, base64
//! encoded. Only its argon2id hash is ever persisted.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::jwt::TokenError;

/// Refresh secret length in bytes (256 bits).
pub const REFRESH_SECRET_LEN: usize = 32;

const SALT_LEN: usize = 16;

/// Plaintext refresh secret. Lives only for the duration of a request.
pub struct RefreshSecret([u8; REFRESH_SECRET_LEN]);

impl RefreshSecret {
    /// Draw a fresh secret from the operating system's CSPRNG.
    pub fn generate() -> Result<Self, TokenError> {
        let mut bytes = [0u8; REFRESH_SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| TokenError::Entropy(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Encode for transport over text channels.
    pub fn encode(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Decode a transported secret. Anything that is not valid base64 of the
    /// expected length is malformed.
    pub fn decode(encoded: &str) -> Result<Self, TokenError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| TokenError::Malformed)?;
        let bytes: [u8; REFRESH_SECRET_LEN] =
            bytes.try_into().map_err(|_| TokenError::Malformed)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshSecret(..)")
    }
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    /// argon2id defaults, roughly tens of milliseconds per hash.
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Hashes and verifies refresh secrets.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> Result<Self, TokenError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| TokenError::Hashing(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a secret into a PHC string with a random salt.
    pub fn hash(&self, secret: &RefreshSecret) -> Result<String, TokenError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|e| TokenError::Entropy(e.to_string()))?;
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| TokenError::Hashing(e.to_string()))?;

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| TokenError::Hashing(e.to_string()))
    }

    /// Verify a secret against a stored hash. Unparseable hashes never match.
    pub fn verify(&self, secret: &RefreshSecret, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}
