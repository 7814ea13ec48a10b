//! Active session storage, one row per user.
//!
//! Only the argon2 hash of the refresh secret is stored. Access tokens are
//! stateless and never touch the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime};
use crate::store::{Fingerprint, Session, SessionStore, StoreError};

#[derive(sqlx::FromRow)]
struct SessionRow {
    guid: String,
    token_hash: String,
    session_id: String,
    user_agent: String,
    ip_address: String,
    created_at: String,
    expires_at: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let guid = Uuid::parse_str(&row.guid)
            .map_err(|e| StoreError::Corrupt(format!("session guid {}: {}", row.guid, e)))?;
        Ok(Self {
            guid,
            session_id: row.session_id,
            token_hash: row.token_hash,
            fingerprint: Fingerprint {
                user_agent: row.user_agent,
                ip: row.ip_address,
            },
            created_at: parse_datetime(&row.created_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
        })
    }
}

/// SQLite-backed session store.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (guid, token_hash, session_id, user_agent, ip_address, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (guid) DO UPDATE SET
                token_hash = excluded.token_hash,
                session_id = excluded.session_id,
                user_agent = excluded.user_agent,
                ip_address = excluded.ip_address,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(session.guid.to_string())
        .bind(&session.token_hash)
        .bind(&session.session_id)
        .bind(&session.fingerprint.user_agent)
        .bind(&session.fingerprint.ip)
        .bind(format_datetime(session.created_at))
        .bind(format_datetime(session.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace(
        &self,
        expected_session_id: &str,
        session: &Session,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET
                token_hash = ?,
                session_id = ?,
                user_agent = ?,
                ip_address = ?,
                created_at = ?,
                expires_at = ?
             WHERE guid = ? AND session_id = ?",
        )
        .bind(&session.token_hash)
        .bind(&session.session_id)
        .bind(&session.fingerprint.user_agent)
        .bind(&session.fingerprint.ip)
        .bind(format_datetime(session.created_at))
        .bind(format_datetime(session.expires_at))
        .bind(session.guid.to_string())
        .bind(expected_session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, guid: Uuid) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT guid, token_hash, session_id, user_agent, ip_address, created_at, expires_at
             FROM sessions WHERE guid = ?",
        )
        .bind(guid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn delete(&self, guid: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE guid = ?")
            .bind(guid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(format_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
