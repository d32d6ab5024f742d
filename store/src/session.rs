use crate::{Result, SessionError};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, SystemTime},
};

/// the payload key under which every session carries its csrf token
pub const CSRF_TOKEN_KEY: &str = "csrf_token";

// 9999-12-31T23:59:59Z
const FAR_FUTURE_SECS: u64 = 253_402_300_799;

fn saturating_add(time: SystemTime, duration: Duration) -> SystemTime {
    time.checked_add(duration)
        .unwrap_or_else(|| SystemTime::UNIX_EPOCH + Duration::from_secs(FAR_FUTURE_SECS))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    user_id: String,
    payload: HashMap<String, Value>,
    ip_address: String,
    user_agent: String,
    fingerprint: String,
    last_activity: SystemTime,
    created_at: SystemTime,
    expires_at: SystemTime,
}

#[derive(Clone, Debug)]
struct SessionInner {
    record: SessionRecord,
    destroyed: bool,
}

/**
# Server-held session state

A `Session` is a handle: cloning it is cheap and every clone observes
the same id, payload and audit fields. This lets a handler that fans
out within a single request share one session. Stores persist
independent copies made with [`Session::snapshot`], so two requests
never share the live handle.

The payload is a map from string keys to any serde-serializable
value. It always contains a [`CSRF_TOKEN_KEY`] entry, which
[`Session::remove`] refuses to delete.

```
use std::time::Duration;
use trillium_session_store::Session;

let session = Session::new("id", "csrf", Duration::from_secs(60));
session.put("count", 1usize).unwrap();
assert_eq!(session.get::<usize>("count"), Some(1));
assert_eq!(session.csrf_token(), "csrf");

let shared = session.clone();
shared.put("count", 2usize).unwrap();
assert_eq!(session.get::<usize>("count"), Some(2));

let detached = session.snapshot();
detached.put("count", 3usize).unwrap();
assert_eq!(session.get::<usize>("count"), Some(2));
```
*/
#[derive(Clone)]
pub struct Session {
    inner: Arc<RwLock<SessionInner>>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        let record = &inner.record;
        f.debug_struct("Session")
            .field("id", &"<<secret>>")
            .field("user_id", &record.user_id)
            .field("payload_keys", &record.payload.keys().collect::<Vec<_>>())
            .field("ip_address", &record.ip_address)
            .field("user_agent", &record.user_agent)
            .field("last_activity", &record.last_activity)
            .field("created_at", &record.created_at)
            .field("expires_at", &record.expires_at)
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.read().record.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Session {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        SessionRecord::deserialize(deserializer).map(Self::from_record)
    }
}

impl Session {
    /**
    Builds an anonymous session with the given id and csrf token
    that expires `max_age` from now. Client fields start empty; see
    [`Session::with_client`].
    */
    pub fn new(id: impl Into<String>, csrf_token: impl Into<String>, max_age: Duration) -> Self {
        let now = SystemTime::now();
        let mut payload = HashMap::new();
        payload.insert(String::from(CSRF_TOKEN_KEY), Value::String(csrf_token.into()));

        Self::from_record(SessionRecord {
            id: id.into(),
            user_id: String::new(),
            payload,
            ip_address: String::new(),
            user_agent: String::new(),
            fingerprint: String::new(),
            last_activity: now,
            created_at: now,
            expires_at: saturating_add(now, max_age),
        })
    }

    fn from_record(record: SessionRecord) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                record,
                destroyed: false,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// records the client ip address and user agent this session is
    /// bound to
    pub fn with_client(self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        {
            let mut inner = self.write();
            inner.record.ip_address = ip_address.into();
            inner.record.user_agent = user_agent.into();
        }
        self
    }

    /// records the derived client fingerprint this session is bound to
    pub fn with_fingerprint(self, fingerprint: impl Into<String>) -> Self {
        self.set_fingerprint(fingerprint);
        self
    }

    /**
    Moves the creation time of this session to `created_at`, shifting
    the last activity and expiry by the same amount. This is useful
    when restoring a session from an external record, and for
    simulating the passage of time.

    ```
    use std::time::{Duration, SystemTime};
    use trillium_session_store::Session;

    let an_hour = Duration::from_secs(60 * 60);
    let session = Session::new("id", "csrf", an_hour)
        .with_created_at(SystemTime::now() - an_hour * 2);
    assert!(session.is_expired());
    ```
    */
    pub fn with_created_at(self, created_at: SystemTime) -> Self {
        {
            let mut inner = self.write();
            let record = &mut inner.record;
            let lifetime = record
                .expires_at
                .duration_since(record.created_at)
                .unwrap_or_default();
            let idle = record
                .last_activity
                .duration_since(record.created_at)
                .unwrap_or_default();
            record.created_at = created_at;
            record.last_activity = saturating_add(created_at, idle);
            record.expires_at = saturating_add(created_at, lifetime);
        }
        self
    }

    /// returns an independent deep copy of this session. changes to
    /// the copy are not observed by this handle, and vice versa.
    pub fn snapshot(&self) -> Self {
        Self::from_record(self.read().record.clone())
    }

    /// the opaque session identifier
    pub fn id(&self) -> String {
        self.read().record.id.clone()
    }

    /// the bound user id. an empty string denotes an anonymous
    /// session
    pub fn user_id(&self) -> String {
        self.read().record.user_id.clone()
    }

    /// binds this session to a user id
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.write().record.user_id = user_id.into();
    }

    /// whether this session has no bound user id
    pub fn is_anonymous(&self) -> bool {
        self.read().record.user_id.is_empty()
    }

    /// the client ip address recorded at creation
    pub fn ip_address(&self) -> String {
        self.read().record.ip_address.clone()
    }

    /// the user agent recorded at creation
    pub fn user_agent(&self) -> String {
        self.read().record.user_agent.clone()
    }

    /// the derived client fingerprint, or an empty string if none has
    /// been bound
    pub fn fingerprint(&self) -> String {
        self.read().record.fingerprint.clone()
    }

    /// replaces the derived client fingerprint
    pub fn set_fingerprint(&self, fingerprint: impl Into<String>) {
        self.write().record.fingerprint = fingerprint.into();
    }

    /// the time of the last successful validate/save cycle
    pub fn last_activity(&self) -> SystemTime {
        self.read().record.last_activity
    }

    /// the time this session was created
    pub fn created_at(&self) -> SystemTime {
        self.read().record.created_at
    }

    /// the fixed end of this session's absolute lifetime
    pub fn expires_at(&self) -> SystemTime {
        self.read().record.expires_at
    }

    /// whether the absolute lifetime has passed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// whether the absolute lifetime has passed as of `now`
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now > self.read().record.expires_at
    }

    /// whether more than `timeout` has elapsed between the last
    /// activity and `now`
    pub fn is_idle_at(&self, now: SystemTime, timeout: Duration) -> bool {
        now > saturating_add(self.read().record.last_activity, timeout)
    }

    /// records activity at the current time
    pub fn touch(&self) {
        self.write().record.last_activity = SystemTime::now();
    }

    /**
    Swaps in `new_id`, clears the fingerprint and records activity,
    all under a single exclusive lock so no reader observes a partial
    update. Returns the previous id.
    */
    pub fn rotate_id(&self, new_id: impl Into<String>) -> String {
        let mut inner = self.write();
        let record = &mut inner.record;
        record.fingerprint.clear();
        record.last_activity = SystemTime::now();
        std::mem::replace(&mut record.id, new_id.into())
    }

    /// the csrf token this session was issued
    pub fn csrf_token(&self) -> String {
        self.read()
            .record
            .payload
            .get(CSRF_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_default()
    }

    /// replaces the csrf token. an empty token is rejected with
    /// [`SessionError::InvalidCsrfToken`]
    pub fn set_csrf_token(&self, csrf_token: impl Into<String>) -> Result<()> {
        let csrf_token = csrf_token.into();
        if csrf_token.is_empty() {
            return Err(SessionError::InvalidCsrfToken);
        }
        self.write()
            .record
            .payload
            .insert(String::from(CSRF_TOKEN_KEY), Value::String(csrf_token));
        Ok(())
    }

    /// deserializes the value stored under `key`, returning None if it
    /// is absent or of a different shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_raw(key)?;
        serde_json::from_value(value).ok()
    }

    /// returns the json value stored under `key`
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.read().record.payload.get(key).cloned()
    }

    /// stores any serde-serializable value under `key`. the csrf
    /// token key only accepts a non-empty string
    pub fn put(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)?;
        if key == CSRF_TOKEN_KEY && !value.as_str().is_some_and(|token| !token.is_empty()) {
            return Err(SessionError::InvalidCsrfToken);
        }
        self.write().record.payload.insert(key, value);
        Ok(())
    }

    /// whether a value is stored under `key`
    pub fn has(&self, key: &str) -> bool {
        self.read().record.payload.contains_key(key)
    }

    /// removes and returns the value stored under `key`. the csrf
    /// token cannot be removed; use [`Session::set_csrf_token`].
    pub fn remove(&self, key: &str) -> Option<Value> {
        if key == CSRF_TOKEN_KEY {
            return None;
        }
        self.write().record.payload.remove(key)
    }

    /// the payload keys currently set
    pub fn keys(&self) -> Vec<String> {
        self.read().record.payload.keys().cloned().collect()
    }

    /// marks this session as destroyed for the rest of the request.
    /// this flag is never persisted.
    pub fn destroy(&self) {
        self.write().destroyed = true;
    }

    /// whether [`Session::destroy`] has been called on this handle
    pub fn is_destroyed(&self) -> bool {
        self.read().destroyed
    }
}
