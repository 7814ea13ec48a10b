use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::store::{StoreError, UserDirectory};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[async_trait]
impl UserDirectory for UserStore {
    async fn exists(&self, guid: Uuid) -> Result<bool, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM users WHERE guid = ? LIMIT 1")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create(&self, guid: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (guid) VALUES (?)")
            .bind(guid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
