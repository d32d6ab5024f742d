#![forbid(unsafe_code)]
#![deny(
    missing_copy_implementations,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    unused_qualifications
)]

/*!
# Server-side sessions for trillium.rs

Session data lives in a [`Store`]; the client only ever holds an
opaque, randomly generated id in a cookie. On top of that, this crate
provides:

* **hijack detection**: each session is bound to the client's ip
  address and user agent (and optionally a fingerprint of other request
  headers). A session presented by a different client is deleted and
  replaced.
* **idle and absolute expiry**: sessions expire after a period of
  inactivity ([`SessionConfig::with_timeout`]) and a fixed time after
  creation ([`SessionConfig::with_max_age`]).
* **id rotation**: [`SessionManager::authenticate`] regenerates the
  session id on login.
* **csrf protection**: every session carries a csrf token, mirrored to
  the client in an `XSRF-TOKEN` cookie and checked by [`CsrfHandler`]
  on state-changing requests.
* **background expiry**: stores are swept for expired sessions on a
  configurable interval until [`SessionManager::close`].

## Security

The client ip is read from `cf-connecting-ip`, `x-forwarded-for` or
`x-real-ip` when present. These headers can be set by anyone. Unless
your application is only reachable through a proxy that overwrites
them, restrict them with [`SessionConfig::with_trusted_proxies`] or
disable them with [`SessionConfig::without_forwarded_headers`].

## Usage

[`trillium_cookies::CookiesHandler`] **MUST** run before the
[`SessionHandler`]:

```
use std::sync::Arc;
use trillium::Conn;
use trillium_cookies::CookiesHandler;
use trillium_session_manager::{MemoryStore, SessionConfig, SessionConnExt, SessionManager};
use trillium_testing::prelude::*;

let config = SessionConfig::new().with_cleanup_interval(std::time::Duration::ZERO);
let manager = Arc::new(SessionManager::new(MemoryStore::new(), config).unwrap());

let app = (
    CookiesHandler::new(),
    manager.handler(),
    |conn: Conn| async move {
        let count: usize = conn.session().get("count").unwrap_or_default();
        conn.with_session("count", count + 1)
            .ok(format!("count: {}", count))
    },
);

let mut conn = get("/").on(&app);
assert_ok!(&mut conn, "count: 0");

let set_cookies = conn
    .response_headers()
    .get_values(trillium::KnownHeaderName::SetCookie)
    .unwrap();
let cookie = set_cookies
    .iter()
    .filter_map(|value| value.as_str())
    .find(|value| value.starts_with("go_session="))
    .and_then(|value| value.split(';').next())
    .unwrap()
    .to_owned();

assert_ok!(get("/").with_request_header("cookie", cookie.clone()).on(&app), "count: 1");
assert_ok!(get("/").with_request_header("cookie", cookie).on(&app), "count: 2");
```
*/

mod client;
mod config;
mod csrf;
mod manager;
mod session_conn_ext;
mod session_handler;
mod sweep;

pub use config::SessionConfig;
pub use csrf::{CsrfConnExt, CsrfHandler, ReceivedForm};
pub use manager::{SessionManager, CSRF_COOKIE_NAME};
pub use session_conn_ext::SessionConnExt;
pub use session_handler::SessionHandler;

pub use trillium_session_store::{
    async_trait, random_string, MemoryStore, Result, Session, SessionError, Store,
    CSRF_TOKEN_BYTES, CSRF_TOKEN_KEY,
};
