//! In-process stores backed by mutex-guarded maps.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Session, SessionStore, StoreError, UserDirectory};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the map consistent, so poisoning is ignored.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        lock(&self.sessions).insert(session.guid, session.clone());
        Ok(())
    }

    async fn replace(
        &self,
        expected_session_id: &str,
        session: &Session,
    ) -> Result<bool, StoreError> {
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(&session.guid) {
            Some(current) if current.session_id == expected_session_id => {
                *current = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, guid: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(lock(&self.sessions).get(&guid).cloned())
    }

    async fn delete(&self, guid: Uuid) -> Result<bool, StoreError> {
        Ok(lock(&self.sessions).remove(&guid).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: Mutex<HashSet<Uuid>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.users).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn exists(&self, guid: Uuid) -> Result<bool, StoreError> {
        Ok(lock(&self.users).contains(&guid))
    }

    async fn create(&self, guid: Uuid) -> Result<(), StoreError> {
        if !lock(&self.users).insert(guid) {
            return Err(StoreError::Corrupt(format!("user {} already exists", guid)));
        }
        Ok(())
    }
}
