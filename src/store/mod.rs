//! Session and user persistence contracts.
//!
//! The auth service depends only on these traits. `db` provides the SQLite
//! implementations, `memory` the in-process ones used in tests.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::{MemorySessionStore, MemoryUserDirectory};

/// Client context a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub ip: String,
}

impl Fingerprint {
    pub fn new(user_agent: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ip: ip.into(),
        }
    }
}

/// The single active session of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub guid: Uuid,
    pub session_id: String,
    /// PHC hash of the refresh secret
    pub token_hash: String,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Durable record of at most one session per user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or atomically replace the session for `session.guid`.
    async fn upsert(&self, session: &Session) -> Result<(), StoreError>;

    /// Replace the session for `session.guid` only if its current session id is
    /// `expected_session_id`. Returns false when no row matched.
    async fn replace(&self, expected_session_id: &str, session: &Session)
    -> Result<bool, StoreError>;

    async fn get(&self, guid: Uuid) -> Result<Option<Session>, StoreError>;

    /// Returns whether a session was deleted.
    async fn delete(&self, guid: Uuid) -> Result<bool, StoreError>;

    /// Purge sessions that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Existence and creation of user identities.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists(&self, guid: Uuid) -> Result<bool, StoreError>;

    async fn create(&self, guid: Uuid) -> Result<(), StoreError>;
}
