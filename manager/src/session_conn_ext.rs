use serde::Serialize;
use trillium::Conn;
use trillium_session_store::Session;

#[derive(Debug, Clone)]
pub(crate) struct CurrentSession(pub(crate) Session);

/**
extension trait to add session support to [`Conn`]

[`SessionHandler`](crate::SessionHandler) **MUST** be called on the
conn prior to using [`SessionConnExt::session`],
[`SessionConnExt::with_session`] or [`SessionConnExt::csrf_token`].
*/
pub trait SessionConnExt {
    /**
    append a key-value pair to the current session, where the key is a
    &str and the value is anything serde-serializable.
    */
    fn with_session(self, key: &str, value: impl Serialize) -> Self;

    /**
    retrieve a reference to the current session

    [`Session`] is a shared handle, so changes made through this
    reference are seen by the handler that persists it.
    */
    fn session(&self) -> &Session;

    /// retrieve the current session, if [`SessionHandler`](crate::SessionHandler) has attached one
    fn try_session(&self) -> Option<&Session>;

    /// the current session's csrf token, for embedding in forms
    fn csrf_token(&self) -> String;
}

impl SessionConnExt for Conn {
    fn session(&self) -> &Session {
        self.try_session()
            .expect("SessionHandler must be executed before calling SessionConnExt::session")
    }

    fn try_session(&self) -> Option<&Session> {
        self.state::<CurrentSession>().map(|current| &current.0)
    }

    fn with_session(self, key: &str, value: impl Serialize) -> Self {
        if let Err(e) = self.session().put(key, value) {
            log::error!("could not store {key} in session: {e}");
        }
        self
    }

    fn csrf_token(&self) -> String {
        self.session().csrf_token()
    }
}
