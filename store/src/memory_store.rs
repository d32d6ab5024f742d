use crate::{Result, Session, SessionError, Store};
use async_lock::RwLock;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::SystemTime};

/**
# In-memory session store

Stores snapshots of sessions in a `HashMap` guarded by a single
reader/writer lock: lookups share the lock, every mutation takes it
exclusively. Cloning a `MemoryStore` yields another handle onto the
same index.

Sessions are lost when the process exits. This store is appropriate
for development, tests and single-process deployments.
*/
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl MemoryStore {
    /// constructs an empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// the number of sessions currently stored, including any that
    /// have expired but not yet been removed
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// whether the store holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// removes every session
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, id: &str) -> Result<Session> {
        {
            let sessions = self.sessions.read().await;
            let session = sessions.get(id).ok_or(SessionError::NotFound)?;
            if !session.is_expired() {
                return Ok(session.snapshot());
            }
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(session) if session.is_expired() => {
                sessions.remove(id);
                log::trace!("removed expired session on lookup");
                Err(SessionError::Expired)
            }
            Some(session) => Ok(session.snapshot()),
            None => Err(SessionError::NotFound),
        }
    }

    async fn set(&self, session: &Session) -> Result<()> {
        let snapshot = session.snapshot();
        self.sessions.write().await.insert(snapshot.id(), snapshot);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn delete_expired(&self) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let now = SystemTime::now();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at() > now);
        Ok(before - sessions.len())
    }

    async fn close(&self) -> Result<()> {
        self.clear().await;
        Ok(())
    }
}
