use futures_lite::future::block_on;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};
use trillium_cookies::CookiesHandler;
use trillium_session_manager::*;
use trillium_testing::prelude::*;

const HOUR: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Clone)]
struct CountingStore {
    inner: MemoryStore,
    sweeps: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    lookups: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

#[async_trait]
impl Store for CountingStore {
    async fn get(&self, id: &str) -> Result<Session> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn set(&self, session: &Session) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn delete_expired(&self) -> Result<usize> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_expired().await
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

// records the id held by a watched session handle at the moment each
// delete reaches the store
#[derive(Debug, Default)]
struct WatchingStore {
    inner: MemoryStore,
    watched: std::sync::Mutex<Option<Session>>,
    ids_at_delete: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Store for WatchingStore {
    async fn get(&self, id: &str) -> Result<Session> {
        self.inner.get(id).await
    }

    async fn set(&self, session: &Session) -> Result<()> {
        self.inner.set(session).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Some(watched) = &*self.watched.lock().unwrap() {
            self.ids_at_delete.lock().unwrap().push(watched.id());
        }
        self.inner.delete(id).await
    }

    async fn delete_expired(&self) -> Result<usize> {
        self.inner.delete_expired().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[derive(Debug)]
struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    async fn get(&self, _id: &str) -> Result<Session> {
        Err(SessionError::store("connection refused"))
    }

    async fn set(&self, _session: &Session) -> Result<()> {
        Err(SessionError::store("connection refused"))
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Err(SessionError::store("connection refused"))
    }

    async fn delete_expired(&self) -> Result<usize> {
        Err(SessionError::store("connection refused"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn without_sweep() -> SessionConfig {
    SessionConfig::new().with_cleanup_interval(Duration::ZERO)
}

#[test]
fn close_stops_the_sweep_and_closes_the_store_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = CountingStore::default();
    let config = SessionConfig::new().with_cleanup_interval(Duration::from_millis(5));
    let manager = SessionManager::new(store.clone(), config).unwrap();

    block_on(async {
        let expired = Session::new("expired", "csrf", HOUR).with_created_at(SystemTime::now() - HOUR * 2);
        store.set(&expired).await.unwrap();

        for _ in 0..200 {
            if store.sweeps.load(Ordering::SeqCst) > 0 && store.inner.is_empty().await {
                break;
            }
            async_io::Timer::after(Duration::from_millis(5)).await;
        }
        assert!(store.sweeps.load(Ordering::SeqCst) > 0);
        assert!(store.inner.is_empty().await);

        assert!(!manager.is_closed());
        manager.close().await.unwrap();
        assert!(manager.is_closed());
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);

        let sweeps = store.sweeps.load(Ordering::SeqCst);
        async_io::Timer::after(Duration::from_millis(50)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), sweeps);

        manager.close().await.unwrap();
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn close_without_sweep() {
    let store = CountingStore::default();
    let manager = SessionManager::new(store.clone(), without_sweep()).unwrap();
    block_on(manager.close()).unwrap();
    block_on(manager.close()).unwrap();
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    assert_eq!(store.sweeps.load(Ordering::SeqCst), 0);
}

#[test]
fn closed_manager_no_longer_touches_the_store() {
    let store = CountingStore::default();
    let manager = Arc::new(SessionManager::new(store.clone(), without_sweep()).unwrap());
    let app = (
        CookiesHandler::new(),
        manager.handler(),
        |conn: Conn| async move { conn.ok("ok") },
    );

    let conn = get("/").on(&app);
    let cookie = conn
        .response_headers()
        .get_values(trillium::KnownHeaderName::SetCookie)
        .into_iter()
        .flat_map(|values| values.iter())
        .filter_map(|value| value.as_str())
        .find(|value| value.starts_with("go_session="))
        .and_then(|value| value.split(';').next())
        .unwrap()
        .to_owned();

    block_on(manager.close()).unwrap();
    let lookups = store.lookups.load(Ordering::SeqCst);
    let writes = store.writes.load(Ordering::SeqCst);

    assert_status!(get("/").on(&app), 500);
    assert_status!(get("/").with_request_header("cookie", cookie).on(&app), 500);

    let session = Session::new("id", "csrf", HOUR);
    assert!(matches!(block_on(manager.save_session(&session)), Err(SessionError::Closed)));
    assert!(matches!(
        block_on(manager.regenerate_session(&session)),
        Err(SessionError::Closed)
    ));
    assert_eq!(session.id(), "id");

    assert_eq!(store.lookups.load(Ordering::SeqCst), lookups);
    assert_eq!(store.writes.load(Ordering::SeqCst), writes);
}

#[test]
fn regenerate_swaps_the_id_before_deleting_the_old_record() {
    let store = Arc::new(WatchingStore::default());
    let manager = SessionManager::new(Arc::clone(&store), without_sweep()).unwrap();
    let session = Session::new("original-id", "csrf", HOUR);
    block_on(manager.save_session(&session)).unwrap();
    *store.watched.lock().unwrap() = Some(session.clone());

    block_on(manager.regenerate_session(&session)).unwrap();

    // a save racing the delete would already write under the new id
    let new_id = session.id();
    assert_ne!(new_id, "original-id");
    assert_eq!(*store.ids_at_delete.lock().unwrap(), vec![new_id]);
    assert!(matches!(
        block_on(store.get("original-id")),
        Err(SessionError::NotFound)
    ));
}

#[test]
fn regenerate_twice_yields_distinct_ids() {
    let manager = SessionManager::new(MemoryStore::new(), without_sweep()).unwrap();
    block_on(async {
        let session = Session::new("original-id", "csrf", HOUR).with_fingerprint("bound");
        manager.store().set(&session).await.unwrap();

        manager.regenerate_session(&session).await.unwrap();
        let first = session.id();
        assert_ne!(first, "original-id");
        assert_eq!(session.fingerprint(), "");
        assert!(matches!(
            manager.store().get("original-id").await,
            Err(SessionError::NotFound)
        ));

        manager.save_session(&session).await.unwrap();
        manager.regenerate_session(&session).await.unwrap();
        let second = session.id();
        assert_ne!(second, first);
        assert_eq!(second.len(), 43);
        assert!(matches!(
            manager.store().get(&first).await,
            Err(SessionError::NotFound)
        ));
        assert_eq!(session.csrf_token(), "csrf");
    });
}

#[test]
fn authenticate_without_regeneration_keeps_the_id() {
    let manager =
        SessionManager::new(MemoryStore::new(), without_sweep().without_regenerate_on_auth())
            .unwrap();
    let session = Session::new("stable-id", "csrf", HOUR);
    block_on(manager.authenticate(&session, "user-7")).unwrap();
    assert_eq!(session.id(), "stable-id");
    assert_eq!(session.user_id(), "user-7");
    assert!(!session.is_anonymous());
}

#[test]
fn reset_csrf_token_replaces_the_token() {
    let manager = SessionManager::new(MemoryStore::new(), without_sweep()).unwrap();
    let session = Session::new("id", "original", HOUR);
    let token = block_on(manager.reset_csrf_token(&session)).unwrap();
    assert_eq!(session.csrf_token(), token);
    assert_ne!(token, "original");
    assert_eq!(token.len(), 43);
}

#[test]
fn get_session_does_not_create() {
    let manager = Arc::new(SessionManager::new(MemoryStore::new(), without_sweep()).unwrap());
    let app = (CookiesHandler::new(), {
        let manager = Arc::clone(&manager);
        move |conn: Conn| {
            let manager = Arc::clone(&manager);
            async move {
                match manager.get_session(&conn).await {
                    Ok(session) => conn.ok(session.get::<String>("name").unwrap_or_default()),
                    Err(e) => conn.with_status(404).with_body(e.to_string()),
                }
            }
        }
    });

    assert_response!(get("/").on(&app), 404, "session not found");
    assert_response!(
        get("/")
            .with_request_header("cookie", "go_session=unknown")
            .on(&app),
        404,
        "session not found"
    );

    let session = Session::new("known", "csrf", HOUR);
    session.put("name", "trillium").unwrap();
    block_on(manager.store().set(&session)).unwrap();
    assert_ok!(
        get("/")
            .with_request_header("cookie", "go_session=known")
            .on(&app),
        "trillium"
    );

    let hijacked = Session::new("hijacked", "csrf", HOUR).with_client("192.0.2.1", "curl/8.0");
    block_on(manager.store().set(&hijacked)).unwrap();
    assert_response!(
        get("/")
            .with_request_header("cookie", "go_session=hijacked")
            .on(&app),
        404,
        "session is hijacked"
    );
    assert!(matches!(
        block_on(manager.store().get("hijacked")),
        Err(SessionError::NotFound)
    ));
}

#[test]
fn validate_session_reports_expiry_before_hijack() {
    let manager = SessionManager::new(MemoryStore::new(), without_sweep()).unwrap();
    let conn = get("/").with_request_header("user-agent", "curl/8.0");

    let live = Session::new("live", "csrf", HOUR).with_client("", "curl/8.0");
    assert!(manager.validate_session(&conn, &live).is_ok());

    let expired = Session::new("expired", "csrf", HOUR)
        .with_client("192.0.2.1", "other")
        .with_created_at(SystemTime::now() - HOUR * 2);
    assert!(matches!(
        manager.validate_session(&conn, &expired),
        Err(SessionError::Expired)
    ));

    let hijacked = Session::new("hijacked", "csrf", HOUR).with_client("", "other");
    assert!(matches!(
        manager.validate_session(&conn, &hijacked),
        Err(SessionError::Hijacked)
    ));
}

#[test]
fn client_ip_honors_forwarding_headers() {
    let manager = SessionManager::new(MemoryStore::new(), without_sweep()).unwrap();
    let conn = get("/")
        .with_request_header("x-forwarded-for", "192.0.2.60, 10.0.0.1")
        .with_peer_ip("10.0.0.1".parse().unwrap());
    assert_eq!(manager.client_ip(&conn), "192.0.2.60".parse().ok());
    assert_eq!(manager.fingerprint(&conn), "");
}

#[test]
fn store_failures_become_server_errors() {
    let manager = Arc::new(SessionManager::new(BrokenStore, without_sweep()).unwrap());
    let app = (
        CookiesHandler::new(),
        manager.handler(),
        |conn: Conn| async move { conn.ok("unreachable") },
    );

    // no cookie, so nothing is loaded, but the save fails
    assert_status!(get("/").on(&app), 500);

    // the lookup fails
    assert_status!(
        get("/")
            .with_request_header("cookie", "go_session=anything")
            .on(&app),
        500
    );
}
