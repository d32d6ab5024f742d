use crate::{session_conn_ext::CurrentSession, SessionManager};
use std::sync::Arc;
use trillium::{async_trait, Conn, Handler, KnownHeaderName, Status};

// present from `run` until cookies have been set in `before_send`
#[derive(Debug, Clone, Copy)]
struct PendingCookies;

/**
# Handler to enable sessions.

Built with [`SessionManager::handler`]. In `run`, this handler loads
the session named by the session cookie (or starts a fresh one) and
attaches it to the conn, where it can be reached through
[`SessionConnExt`](crate::SessionConnExt). It also adds `Vary: Cookie`
and `Cache-Control: no-cache="Set-Cookie"` so that shared caches do not
hand one client's cookies to another.

In `before_send`, the session is bound to the request fingerprint if it
has none, saved to the store, and the session and `XSRF-TOKEN` cookies
are set. This happens at most once per conn. A session destroyed with
[`SessionManager::destroy_session`] is neither saved nor re-issued.

[`trillium_cookies::CookiesHandler`] **MUST** run before this handler.
If the session cannot be loaded or saved, the conn is given a 500
status.
*/
#[derive(Debug, Clone)]
pub struct SessionHandler {
    manager: Arc<SessionManager>,
}

impl SessionHandler {
    /// Constructs a handler for the given manager. See also
    /// [`SessionManager::handler`].
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Handler for SessionHandler {
    async fn run(&self, mut conn: Conn) -> Conn {
        if conn.state::<CurrentSession>().is_some() {
            return conn;
        }

        let session = match self.manager.start_session(&conn).await {
            Ok(session) => session,
            Err(e) => {
                log::error!("could not start session: {e}");
                return conn.with_status(Status::InternalServerError).halt();
            }
        };

        let headers = conn.response_headers_mut();
        headers.append(KnownHeaderName::Vary, "Cookie");
        headers.append(KnownHeaderName::CacheControl, r#"no-cache="Set-Cookie""#);

        conn.with_state(CurrentSession(session))
            .with_state(PendingCookies)
    }

    async fn before_send(&self, mut conn: Conn) -> Conn {
        if conn.take_state::<PendingCookies>().is_none() {
            return conn;
        }

        let Some(CurrentSession(session)) = conn.state::<CurrentSession>().cloned() else {
            return conn;
        };

        if session.is_destroyed() {
            return conn;
        }

        if session.fingerprint().is_empty() {
            session.set_fingerprint(self.manager.fingerprint(&conn));
        }

        if let Err(e) = self.manager.save_session(&session).await {
            log::error!("could not save session: {e}");
            return conn.with_status(Status::InternalServerError).with_body("");
        }

        self.manager.set_cookies(&mut conn, &session);
        conn
    }
}
