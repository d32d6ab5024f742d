use std::{error::Error as StdError, time::Duration};

/// Concrete errors that occur within the session lifecycle
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    /// no session is stored under the requested id
    #[error("session not found")]
    NotFound,

    /// the absolute lifetime or the idle timeout of the session has
    /// been exceeded
    #[error("session has expired")]
    Expired,

    /// the client fingerprint (ip address, user agent or derived
    /// fingerprint) differs from the one recorded at creation
    #[error("session is hijacked")]
    Hijacked,

    /// the submitted csrf token is missing or does not match the
    /// session's token
    #[error("csrf token mismatch")]
    CsrfMismatch,

    /// a mutating request reached csrf verification without a session
    /// attached to the conn
    #[error("session required")]
    SessionRequired,

    /// an attempt to store an empty or non-string csrf token
    #[error("csrf token must be a non-empty string")]
    InvalidCsrfToken,

    /// the session manager has been closed and no longer uses its
    /// store
    #[error("session manager is closed")]
    Closed,

    /// the operating system entropy source could not be read
    #[error("failed to generate random token: {0}")]
    Generation(#[from] rand::Error),

    /// a payload value could not be converted to or from json
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// a store backend failed. the inner error is the backend's own
    #[error("session store error: {0}")]
    Store(#[source] Box<dyn StdError + Send + Sync + 'static>),

    /// a store operation was abandoned after the given bound
    #[error("session store operation timed out after {0:?}")]
    Timeout(Duration),

    /// an io error, such as failure to spawn the expiry sweep
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// wraps a backend-specific error for propagation through the
    /// [`Store`](crate::Store) interface
    pub fn store(error: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Store(error.into())
    }

    /// whether load-or-create may recover from this error by issuing a
    /// fresh session
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired)
    }
}

/// this crate's result type
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
