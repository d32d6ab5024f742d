use crate::{
    client, csrf, sweep::ExpirySweep, CsrfHandler, SessionConfig, SessionConnExt, SessionHandler,
};
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::SystemTime,
};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use trillium::Conn;
use trillium_cookies::{cookie::Cookie, CookiesConnExt};
use trillium_session_store::{
    random_string, Result, Session, SessionError, Store, CSRF_TOKEN_BYTES,
};

/// The name of the cookie that mirrors the session's csrf token to
/// client-side scripts.
pub const CSRF_COOKIE_NAME: &str = "XSRF-TOKEN";

/**
# The session manager

Owns the [`Store`], the [`SessionConfig`] and the background expiry
sweep. Every operation takes `&self`, so a single manager is shared
behind an [`Arc`] by the [`SessionHandler`] and [`CsrfHandler`] it
hands out.

Reading the session cookie requires
[`trillium_cookies::CookiesHandler`] to have run on the conn.

```
use std::sync::Arc;
use trillium_session_manager::{MemoryStore, SessionConfig, SessionManager};

# futures_lite::future::block_on(async {
let manager = Arc::new(SessionManager::new(MemoryStore::new(), SessionConfig::new())?);
let sessions = manager.handler();
let csrf = manager.csrf_handler();

// ... serve (trillium_cookies::CookiesHandler::new(), sessions, csrf, app)

manager.close().await?;
# Ok::<(), trillium_session_manager::SessionError>(()) }).unwrap();
```
*/
#[derive(Debug)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    config: SessionConfig,
    sweep: Mutex<Option<ExpirySweep>>,
    closed: AtomicBool,
}

impl SessionManager {
    /// Builds a manager around `store`. Unless the configured cleanup
    /// interval is zero, this also starts the background expiry
    /// sweep, which is only stopped by [`SessionManager::close`].
    pub fn new(store: impl Store, config: SessionConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(store);

        let sweep = if config.cleanup_interval.is_zero() {
            log::debug!("session expiry sweep disabled");
            None
        } else {
            Some(ExpirySweep::start(
                Arc::clone(&store),
                config.cleanup_interval,
                config.sweep_timeout,
            )?)
        };

        Ok(Self {
            store,
            config,
            sweep: Mutex::new(sweep),
            closed: AtomicBool::new(false),
        })
    }

    /// the configuration this manager was built with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// the backing store
    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    /// Builds a [`SessionHandler`] that loads a session for every conn
    /// and persists it before the response is sent.
    pub fn handler(self: &Arc<Self>) -> SessionHandler {
        SessionHandler::new(Arc::clone(self))
    }

    /// Builds a [`CsrfHandler`] that rejects state-changing requests
    /// without a matching csrf token.
    pub fn csrf_handler(self: &Arc<Self>) -> CsrfHandler {
        CsrfHandler::new(Arc::clone(self))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn cookie_value(&self, conn: &Conn) -> Option<String> {
        conn.cookies()
            .get(&self.config.cookie_name)
            .map(|cookie| cookie.value().to_owned())
            .filter(|value| !value.is_empty())
    }

    fn fresh_session(&self, conn: &Conn) -> Result<Session> {
        let id = random_string(self.config.token_length)?;
        let csrf_token = random_string(CSRF_TOKEN_BYTES)?;
        log::trace!("issuing a fresh session");
        Ok(Session::new(id, csrf_token, self.config.max_age)
            .with_client(self.client_ip_string(conn), client::user_agent(conn))
            .with_fingerprint(self.fingerprint(conn)))
    }

    /**
    Loads the session named by the request's session cookie, or
    creates a fresh one.

    A stored session that fails [`SessionManager::validate_session`]
    is deleted from the store and replaced. A missing cookie, an
    unknown id and an expired record all result in a fresh session
    bound to the current client. Store failures and token generation
    failures are returned.

    The fresh session is not persisted here; see
    [`SessionManager::save_session`].
    */
    pub async fn start_session(&self, conn: &Conn) -> Result<Session> {
        self.ensure_open()?;
        if let Some(id) = self.cookie_value(conn) {
            match self.store.get(&id).await {
                Ok(session) => match self.validate_session(conn, &session) {
                    Ok(()) => return Ok(session),
                    Err(e) => {
                        match e {
                            SessionError::Hijacked => log::warn!("discarding session: {e}"),
                            _ => log::debug!("discarding session: {e}"),
                        }
                        self.store.delete(&id).await?;
                    }
                },
                Err(e) if e.is_recoverable() => log::debug!("{e}, issuing a fresh session"),
                Err(e) => return Err(e),
            }
        }

        self.fresh_session(conn)
    }

    /**
    Checks a loaded session against the current time and the current
    client.

    Returns [`SessionError::Expired`] if the absolute deadline has
    passed or the session has been idle for longer than the configured
    timeout, and [`SessionError::Hijacked`] if the user agent, client
    ip or fingerprint differ from the values the session was bound to.
    */
    pub fn validate_session(&self, conn: &Conn, session: &Session) -> Result<()> {
        let now = SystemTime::now();
        if session.is_expired_at(now) || session.is_idle_at(now, self.config.timeout) {
            return Err(SessionError::Expired);
        }

        if session.user_agent() != client::user_agent(conn)
            || session.ip_address() != self.client_ip_string(conn)
        {
            return Err(SessionError::Hijacked);
        }

        let fingerprint = self.fingerprint(conn);
        if !bool::from(session.fingerprint().as_bytes().ct_eq(fingerprint.as_bytes())) {
            return Err(SessionError::Hijacked);
        }

        Ok(())
    }

    /// Refreshes the session's last activity and writes it to the
    /// store.
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.ensure_open()?;
        session.touch();
        self.store.set(session).await
    }

    /**
    Looks up the session named by the request's session cookie without
    creating one.

    Returns [`SessionError::NotFound`] when there is no cookie. A
    session that fails validation is deleted and the failure returned.
    A valid session is touched and saved before it is returned.
    */
    pub async fn get_session(&self, conn: &Conn) -> Result<Session> {
        self.ensure_open()?;
        let id = self.cookie_value(conn).ok_or(SessionError::NotFound)?;
        let session = self.store.get(&id).await?;

        if let Err(e) = self.validate_session(conn, &session) {
            log::debug!("discarding session: {e}");
            self.store.delete(&id).await?;
            return Err(e);
        }

        self.save_session(&session).await?;
        Ok(session)
    }

    /**
    Ends the session for this conn.

    The session attached by [`SessionHandler`], if any, is marked
    destroyed so that it is neither saved nor re-issued when the
    response is sent. If the request carried a session cookie, the
    record it names is deleted and an expired replacement cookie is
    set. With no cookie and no attached session this does nothing.
    */
    pub async fn destroy_session(&self, conn: &mut Conn) -> Result<()> {
        self.ensure_open()?;
        if let Some(session) = conn.try_session().cloned() {
            session.destroy();
            self.store.delete(&session.id()).await?;
        }

        let Some(id) = self.cookie_value(conn) else {
            return Ok(());
        };

        self.store.delete(&id).await?;
        conn.cookies_mut().add(self.removal_cookie());
        log::debug!("destroyed session");
        Ok(())
    }

    /**
    Replaces the session's id with a freshly generated one, deleting
    the record stored under the old id.

    The new id is generated before anything else changes, so a
    generation failure leaves the session and the store untouched. The
    id is swapped before the old record is deleted, so a concurrent save
    of the same handle always writes under the new id. The
    fingerprint is cleared and is rebound from the current request when
    the session is next saved by [`SessionHandler`].
    */
    pub async fn regenerate_session(&self, session: &Session) -> Result<()> {
        self.ensure_open()?;
        let new_id = random_string(self.config.token_length)?;
        let old_id = session.rotate_id(new_id);
        self.store.delete(&old_id).await?;
        log::debug!("regenerated session id");
        Ok(())
    }

    /**
    Binds `user_id` to the session. Unless disabled with
    [`SessionConfig::without_regenerate_on_auth`], the session id is
    regenerated first so that an id known before login is worthless
    after it.
    */
    pub async fn authenticate(&self, session: &Session, user_id: impl Into<String>) -> Result<()> {
        if self.config.regenerate_on_auth {
            self.regenerate_session(session).await?;
        }
        session.set_user_id(user_id);
        Ok(())
    }

    /// Replaces the session's csrf token and returns the new one.
    pub async fn reset_csrf_token(&self, session: &Session) -> Result<String> {
        let csrf_token = random_string(CSRF_TOKEN_BYTES)?;
        session.set_csrf_token(csrf_token.clone())?;
        Ok(csrf_token)
    }

    /**
    Compares the csrf token submitted with this request to the
    session's token in constant time.

    The token is taken from the configured csrf header, falling back to
    the configured form field in the query string or an
    `application/x-www-form-urlencoded` body. A body read for this
    purpose is kept on the conn; see
    [`CsrfConnExt::received_form`](crate::CsrfConnExt::received_form).

    Always succeeds when csrf verification is disabled. This does not
    consider the request method; [`CsrfHandler`] only calls it for
    state-changing methods.
    */
    pub async fn validate_csrf_token(&self, conn: &mut Conn, session: &Session) -> Result<()> {
        if !self.config.csrf_enabled {
            return Ok(());
        }

        let expected = session.csrf_token();
        if expected.is_empty() {
            return Err(SessionError::CsrfMismatch);
        }

        let submitted = csrf::submitted_token(&self.config, conn)
            .await
            .unwrap_or_default();

        if bool::from(expected.as_bytes().ct_eq(submitted.as_bytes())) {
            Ok(())
        } else {
            Err(SessionError::CsrfMismatch)
        }
    }

    /// The client ip for this conn, honoring forwarding headers from
    /// trusted peers. `None` when a forwarding header could not be
    /// parsed or there is no peer address.
    pub fn client_ip(&self, conn: &Conn) -> Option<IpAddr> {
        client::client_ip(&self.config, conn)
    }

    fn client_ip_string(&self, conn: &Conn) -> String {
        client::client_ip_string(&self.config, conn)
    }

    /// The fingerprint of this conn's configured fingerprint headers.
    /// Empty when no fingerprint headers are configured.
    pub fn fingerprint(&self, conn: &Conn) -> String {
        client::fingerprint(&self.config, conn)
    }

    fn cookie(&self, name: &str, value: String) -> Cookie<'static> {
        let mut cookie: Cookie<'static> = Cookie::build((name.to_owned(), value))
            .path("/")
            .http_only(self.config.http_only)
            .secure(self.config.secure)
            .same_site(self.config.same_site)
            .into();

        if let Some(domain) = &self.config.cookie_domain {
            cookie.set_domain(domain.clone());
        }

        cookie
    }

    pub(crate) fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        let mut cookie = self.cookie(&self.config.cookie_name, session.id());
        cookie.set_expires(OffsetDateTime::from(session.expires_at()));
        cookie
    }

    pub(crate) fn csrf_cookie(&self, session: &Session) -> Cookie<'static> {
        self.cookie(CSRF_COOKIE_NAME, session.csrf_token())
    }

    fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.cookie(&self.config.cookie_name, String::new());
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        cookie
    }

    pub(crate) fn set_cookies(&self, conn: &mut Conn, session: &Session) {
        let jar = conn.cookies_mut();
        jar.add(self.session_cookie(session));
        jar.add(self.csrf_cookie(session));
    }

    /// whether [`SessionManager::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /**
    Stops the expiry sweep, waiting for it to exit, then closes the
    store. Only the first call does anything; later calls return
    `Ok(())` immediately.

    Once closed, every operation that would reach the store returns
    [`SessionError::Closed`] instead.
    */
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sweep = self
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(sweep) = sweep {
            sweep.stop().await;
        }

        self.store.close().await?;
        log::info!("session manager closed");
        Ok(())
    }
}
