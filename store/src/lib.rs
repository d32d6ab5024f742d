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
# Session state and storage for trillium-session-manager

This crate holds the framework-independent half of
[trillium-session-manager](https://docs.rs/trillium-session-manager):

* [`Session`], a concurrency-safe key/value bag with identity and
  audit fields
* the [`Store`] trait that persistence backends implement
* [`MemoryStore`], the reference in-memory backend
* [`random_string`], the token generator used for session ids and
  csrf tokens
* [`SessionError`], the error taxonomy shared by stores and the
  manager

```
use std::time::Duration;
use trillium_session_store::{MemoryStore, Session, SessionError, Store};

# futures_lite::future::block_on(async {
let store = MemoryStore::new();
let session = Session::new("id", "csrf", Duration::from_secs(60));
store.set(&session).await?;

assert_eq!(store.get("id").await?.csrf_token(), "csrf");
store.delete("id").await?;
assert!(matches!(store.get("id").await, Err(SessionError::NotFound)));
# Ok::<(), SessionError>(()) }).unwrap();
```
*/

mod error;
pub use error::{Result, SessionError};

mod token;
pub use token::{random_string, CSRF_TOKEN_BYTES};

mod session;
pub use session::{Session, CSRF_TOKEN_KEY};

mod store;
pub use store::Store;

mod memory_store;
pub use memory_store::MemoryStore;

pub use async_trait::async_trait;
