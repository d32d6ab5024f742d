use crate::{SessionConfig, SessionConnExt, SessionManager};
use querystrong::QueryStrong;
use std::sync::Arc;
use trillium::{async_trait, Conn, Handler, KnownHeaderName, Method, Status};
use trillium_session_store::SessionError;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/**
The urlencoded request body, kept on the conn when it was read to look
for a csrf token. Retrieve it with [`CsrfConnExt::received_form`]
since the body cannot be read a second time.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedForm(String);

impl ReceivedForm {
    /// the raw urlencoded body
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// extension trait to retrieve a request body consumed by csrf verification
pub trait CsrfConnExt {
    /// the urlencoded body, if csrf verification read it
    fn received_form(&self) -> Option<&str>;
}

impl CsrfConnExt for Conn {
    fn received_form(&self) -> Option<&str> {
        self.state::<ReceivedForm>().map(ReceivedForm::as_str)
    }
}

fn form_value(urlencoded: &str, field: &str) -> Option<String> {
    QueryStrong::parse(urlencoded)
        .ok()?
        .get_str(field)
        .map(String::from)
        .filter(|value| !value.is_empty())
}

fn is_form(conn: &Conn) -> bool {
    conn.request_headers()
        .get_str(KnownHeaderName::ContentType)
        .map_or(false, |content_type| {
            content_type
                .trim_start()
                .to_ascii_lowercase()
                .starts_with(FORM_CONTENT_TYPE)
        })
}

pub(crate) async fn submitted_token(config: &SessionConfig, conn: &mut Conn) -> Option<String> {
    let from_header = conn
        .request_headers()
        .get_str(config.csrf_header.clone())
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_owned());
    }

    if let Some(token) = form_value(conn.querystring(), &config.csrf_field) {
        return Some(token);
    }

    if !is_form(conn) {
        return None;
    }

    let body = match conn.received_form() {
        Some(body) => body.to_owned(),
        None => match conn.request_body_string().await {
            Ok(body) => {
                conn.insert_state(ReceivedForm(body.clone()));
                body
            }
            Err(e) => {
                log::warn!("could not read form body for csrf token: {e}");
                return None;
            }
        },
    };

    form_value(&body, &config.csrf_field)
}

/**
# Handler to reject cross-site request forgery.

Built with [`SessionManager::csrf_handler`], and placed after the
[`SessionHandler`](crate::SessionHandler). `GET`, `HEAD`, `OPTIONS`
and other safe methods pass through untouched. `POST`, `PUT`, `PATCH`
and `DELETE` requests must carry the session's csrf token in the
configured header (`x-xsrf-token` by default) or form field
(`csrf_token` by default). Otherwise the conn is halted with a 401
status and a short plain-text reason.

```
use std::sync::Arc;
use trillium_cookies::CookiesHandler;
use trillium_session_manager::{MemoryStore, SessionConfig, SessionManager};
use trillium_testing::prelude::*;

let config = SessionConfig::new().with_cleanup_interval(std::time::Duration::ZERO);
let manager = Arc::new(SessionManager::new(MemoryStore::new(), config).unwrap());
let app = (
    CookiesHandler::new(),
    manager.handler(),
    manager.csrf_handler(),
    "ok",
);

assert_ok!(get("/").on(&app), "ok");
assert_response!(post("/").on(&app), 401, "csrf token mismatch");
```
*/
#[derive(Debug, Clone)]
pub struct CsrfHandler {
    manager: Arc<SessionManager>,
}

impl CsrfHandler {
    /// Constructs a handler for the given manager. See also
    /// [`SessionManager::csrf_handler`].
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

fn is_state_changing(method: Method) -> bool {
    matches!(
        method,
        Method::Post | Method::Put | Method::Patch | Method::Delete
    )
}

fn deny(mut conn: Conn, error: SessionError) -> Conn {
    log::debug!("rejecting {} {}: {error}", conn.method(), conn.path());
    conn.response_headers_mut()
        .insert(KnownHeaderName::ContentType, "text/plain");
    conn.with_status(Status::Unauthorized)
        .with_body(error.to_string())
        .halt()
}

#[async_trait]
impl Handler for CsrfHandler {
    async fn run(&self, mut conn: Conn) -> Conn {
        if !self.manager.config().csrf_enabled() || !is_state_changing(conn.method()) {
            return conn;
        }

        let Some(session) = conn.try_session().cloned() else {
            return deny(conn, SessionError::SessionRequired);
        };

        match self.manager.validate_csrf_token(&mut conn, &session).await {
            Ok(()) => conn,
            Err(e) => deny(conn, e),
        }
    }
}
