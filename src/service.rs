//! Token lifecycle: authorize, refresh with rotation, deauthorize.
//!
//! Each user has at most one live session. Every successful refresh replaces
//! the session id and the refresh secret, so a captured refresh secret is good
//! for one use at most. Any sign of tampering deletes the session before the
//! caller is turned away.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::issuer::TokenIssuer;
use crate::jwt::TokenError;
use crate::notify::{self, IpChangeEvent, Notifier};
use crate::secret::RefreshSecret;
use crate::store::{Fingerprint, Session, SessionStore, StoreError, UserDirectory};

/// Lifetime of a stored session, independent of the access token TTL.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Credentials handed to the client. Never persisted as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Base64 refresh secret
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    User,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    SessionMismatch,
    SecretMismatch,
    UserAgentMismatch,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed client input, e.g. a guid that does not parse
    #[error("invalid input: {0}")]
    Validation(&'static str),
    #[error("{0:?} not found")]
    NotFound(Missing),
    #[error("security violation: {0:?}")]
    SecurityViolation(Violation),
    #[error("internal error: {0}")]
    Infrastructure(String),
}

impl AuthError {
    /// Errors the outside world only ever sees as "unauthorized".
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, AuthError::NotFound(_) | AuthError::SecurityViolation(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Infrastructure(e.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        AuthError::Infrastructure(e.to_string())
    }
}

/// Parse a client-supplied user guid.
pub fn parse_guid(raw: &str) -> Result<Uuid, AuthError> {
    if raw.is_empty() {
        return Err(AuthError::Validation("guid cannot be empty"));
    }
    if raw.len() > 36 {
        return Err(AuthError::Validation("guid is too long"));
    }
    Uuid::parse_str(raw).map_err(|_| AuthError::Validation("invalid guid"))
}

/// Orchestrates issuing, rotating and revoking token pairs.
///
/// Holds no mutable state of its own; all of it lives in the session store.
#[derive(Clone)]
pub struct AuthService {
    issuer: Arc<dyn TokenIssuer>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            issuer,
            sessions,
            users,
            notifier,
            session_ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// The issuer this service signs with. Request authentication must verify
    /// against the same one.
    pub fn issuer(&self) -> &Arc<dyn TokenIssuer> {
        &self.issuer
    }

    /// Issue a new token pair, creating the user when no guid is given.
    /// Supersedes any session the user already had.
    pub async fn authorize(
        &self,
        guid: Option<Uuid>,
        user_agent: &str,
        ip: &str,
    ) -> Result<TokenPair, AuthError> {
        let (guid, is_new) = match guid {
            Some(guid) => {
                self.ensure_user(guid).await?;
                (guid, false)
            }
            None => (Uuid::new_v4(), true),
        };

        // Everything that can fail without side effects runs before the first write.
        let (pair, session) = self.issue(guid, user_agent, ip).await?;
        if is_new {
            self.create_user(guid).await?;
        }
        self.sessions.upsert(&session).await.inspect_err(|e| {
            error!(guid = %guid, error = %e, "Failed to store session");
        })?;

        info!(guid = %guid, "Session issued");
        Ok(pair)
    }

    /// Exchange a refresh secret for a new token pair.
    pub async fn refresh(
        &self,
        guid: Uuid,
        session_id: &str,
        refresh_token: &str,
        user_agent: &str,
        ip: &str,
    ) -> Result<TokenPair, AuthError> {
        let Some(stored) = self.sessions.get(guid).await? else {
            warn!(guid = %guid, "Refresh without an active session");
            return Err(AuthError::NotFound(Missing::Session));
        };

        if stored.is_expired(Utc::now()) {
            info!(guid = %guid, "Refresh of an expired session");
            self.sessions.delete(guid).await?;
            return Err(AuthError::NotFound(Missing::Session));
        }

        if stored.session_id != session_id {
            return Err(self.revoke(guid, Violation::SessionMismatch).await);
        }

        let secret_matches = match self.issuer.decode_refresh_secret(refresh_token) {
            Ok(secret) => self.verify_secret(secret, stored.token_hash.clone()).await?,
            Err(_) => false,
        };
        if !secret_matches {
            return Err(self.revoke(guid, Violation::SecretMismatch).await);
        }

        if stored.fingerprint.user_agent != user_agent {
            return Err(self.revoke(guid, Violation::UserAgentMismatch).await);
        }

        if stored.fingerprint.ip != ip {
            info!(guid = %guid, old_ip = %stored.fingerprint.ip, new_ip = %ip, "Refresh from a new IP");
            notify::dispatch(
                Arc::clone(&self.notifier),
                IpChangeEvent {
                    guid,
                    old_ip: stored.fingerprint.ip.clone(),
                    new_ip: ip.to_string(),
                    user_agent: user_agent.to_string(),
                    time: Utc::now(),
                },
            );
        }

        self.ensure_user(guid).await?;
        let (pair, session) = self.issue(guid, user_agent, ip).await?;

        // Only the refresh that still holds the current session id may rotate it.
        if !self.sessions.replace(session_id, &session).await? {
            warn!(guid = %guid, "Session rotated concurrently");
            return Err(AuthError::SecurityViolation(Violation::SessionMismatch));
        }

        info!(guid = %guid, "Session rotated");
        Ok(pair)
    }

    /// Delete the user's session. Already issued access tokens stay valid until
    /// they expire.
    pub async fn deauthorize(&self, guid: Uuid) -> Result<(), AuthError> {
        let deleted = self.sessions.delete(guid).await.inspect_err(|e| {
            error!(guid = %guid, error = %e, "Failed to delete session");
        })?;
        info!(guid = %guid, had_session = deleted, "Deauthorized");
        Ok(())
    }

    async fn ensure_user(&self, guid: Uuid) -> Result<(), AuthError> {
        let exists = self.users.exists(guid).await.inspect_err(|e| {
            error!(guid = %guid, error = %e, "Failed to check user existence");
        })?;
        if !exists {
            warn!(guid = %guid, "Unknown guid");
            return Err(AuthError::NotFound(Missing::User));
        }
        Ok(())
    }

    async fn create_user(&self, guid: Uuid) -> Result<(), AuthError> {
        self.users.create(guid).await.inspect_err(|e| {
            error!(guid = %guid, error = %e, "Failed to create user");
        })?;
        info!(guid = %guid, "User created");
        Ok(())
    }

    /// Build a fresh token pair and the session record that backs it.
    /// Nothing is written here.
    async fn issue(
        &self,
        guid: Uuid,
        user_agent: &str,
        ip: &str,
    ) -> Result<(TokenPair, Session), AuthError> {
        let session_id = Uuid::new_v4().to_string();

        let access_token = self
            .issuer
            .generate_access_token(guid, &session_id)
            .inspect_err(|e| error!(guid = %guid, error = %e, "Failed to generate access token"))?;

        let secret = self
            .issuer
            .generate_refresh_secret()
            .inspect_err(|e| error!(guid = %guid, error = %e, "Failed to generate refresh secret"))?;
        let refresh_token = self.issuer.encode_refresh_secret(&secret);
        let token_hash = self.hash_secret(secret).await?;

        let now = Utc::now();
        let session = Session {
            guid,
            session_id,
            token_hash,
            fingerprint: Fingerprint::new(user_agent, ip),
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        Ok((
            TokenPair {
                access_token,
                refresh_token,
            },
            session,
        ))
    }

    /// Fail closed: drop the session, then report the violation.
    async fn revoke(&self, guid: Uuid, violation: Violation) -> AuthError {
        warn!(guid = %guid, violation = ?violation, "Revoking session");
        match self.sessions.delete(guid).await {
            Ok(_) => AuthError::SecurityViolation(violation),
            Err(e) => {
                error!(guid = %guid, error = %e, "Failed to revoke session");
                AuthError::from(e)
            }
        }
    }

    async fn hash_secret(&self, secret: RefreshSecret) -> Result<String, AuthError> {
        let issuer = Arc::clone(&self.issuer);
        tokio::task::spawn_blocking(move || issuer.hash_refresh_secret(&secret))
            .await
            .map_err(|e| AuthError::Infrastructure(format!("hashing task failed: {}", e)))?
            .map_err(|e| {
                error!(error = %e, "Failed to hash refresh secret");
                AuthError::from(e)
            })
    }

    async fn verify_secret(&self, secret: RefreshSecret, hash: String) -> Result<bool, AuthError> {
        let issuer = Arc::clone(&self.issuer);
        tokio::task::spawn_blocking(move || issuer.compare_refresh_secret(&secret, &hash))
            .await
            .map_err(|e| AuthError::Infrastructure(format!("verification task failed: {}", e)))
    }
}
