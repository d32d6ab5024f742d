use crate::{Result, Session};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

/**
# Pluggable session persistence

A key-value index from session id to [`Session`] with expiry-aware
lookup. The store is the single source of truth for session state
between requests.

Every operation is a future; dropping it cancels the operation, and
backends that perform io should stop work promptly when that happens.

## Contract

* [`Store::get`] fails with
  [`SessionError::NotFound`](crate::SessionError::NotFound) when no
  entry exists, and with
  [`SessionError::Expired`](crate::SessionError::Expired) when the
  entry's absolute lifetime has passed, removing that entry first.
* [`Store::set`] upserts by [`Session::id`]. Implementations should
  persist a snapshot rather than the live handle.
* [`Store::delete`] is idempotent.
* [`Store::delete_expired`] removes every entry whose expiry is at or
  before the current time, and nothing else.
* No operation is called after [`Store::close`].

Backend io failures should be wrapped with
[`SessionError::store`](crate::SessionError::store) and are
propagated unchanged by the session manager.
*/
#[async_trait]
pub trait Store: Send + Sync + Debug + 'static {
    /// retrieves the session stored under `id`
    async fn get(&self, id: &str) -> Result<Session>;

    /// stores `session` under its current id
    async fn set(&self, session: &Session) -> Result<()>;

    /// removes the session stored under `id`, if any
    async fn delete(&self, id: &str) -> Result<()>;

    /// removes every expired session, returning how many were removed
    async fn delete_expired(&self) -> Result<usize>;

    /// releases any resources held by this store
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, id: &str) -> Result<Session> {
        S::get(self, id).await
    }

    async fn set(&self, session: &Session) -> Result<()> {
        S::set(self, session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        S::delete(self, id).await
    }

    async fn delete_expired(&self) -> Result<usize> {
        S::delete_expired(self).await
    }

    async fn close(&self) -> Result<()> {
        S::close(self).await
    }
}

#[async_trait]
impl Store for Box<dyn Store> {
    async fn get(&self, id: &str) -> Result<Session> {
        self.as_ref().get(id).await
    }

    async fn set(&self, session: &Session) -> Result<()> {
        self.as_ref().set(session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.as_ref().delete(id).await
    }

    async fn delete_expired(&self) -> Result<usize> {
        self.as_ref().delete_expired().await
    }

    async fn close(&self) -> Result<()> {
        self.as_ref().close().await
    }
}
