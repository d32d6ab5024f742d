use futures_lite::future;
use querystrong::QueryStrong;
use std::sync::Arc;
use trillium::{Conn, Status};
use trillium_cookies::CookiesHandler;
use trillium_router::Router;
use trillium_session_manager::{
    CsrfConnExt, MemoryStore, SessionConfig, SessionConnExt, SessionManager,
};

async fn form_field(conn: &mut Conn, field: &str) -> Option<String> {
    let body = match conn.received_form() {
        Some(form) => form.to_owned(),
        None => conn.request_body_string().await.ok()?,
    };
    QueryStrong::parse(&body)
        .ok()?
        .get_str(field)
        .map(String::from)
}

pub fn main() {
    env_logger::init();

    let manager = Arc::new(
        SessionManager::new(MemoryStore::new(), SessionConfig::new().with_http_only(false))
            .expect("could not start session manager"),
    );

    let router = Router::new()
        .get("/", |conn: Conn| async move { conn.with_status(Status::NoContent) })
        .get("/whoami", |conn: Conn| async move {
            let greeting = if conn.session().is_anonymous() {
                String::from("hello, stranger")
            } else {
                format!("hello, {}", conn.session().user_id())
            };
            conn.ok(greeting)
        })
        .post("/auth/register", {
            let manager = Arc::clone(&manager);
            move |mut conn: Conn| {
                let manager = Arc::clone(&manager);
                async move {
                    let Some(user_id) = form_field(&mut conn, "user_id").await else {
                        return conn.with_status(Status::BadRequest).with_body("user_id required").halt();
                    };

                    let session = conn.session().clone();
                    match manager.authenticate(&session, user_id).await {
                        Ok(()) => conn.with_status(Status::NoContent).halt(),
                        Err(e) => {
                            log::error!("could not authenticate: {e}");
                            conn.with_status(Status::InternalServerError).halt()
                        }
                    }
                }
            }
        })
        .post("/auth/logout", {
            let manager = Arc::clone(&manager);
            move |mut conn: Conn| {
                let manager = Arc::clone(&manager);
                async move {
                    match manager.destroy_session(&mut conn).await {
                        Ok(()) => conn.with_status(Status::NoContent).halt(),
                        Err(e) => {
                            log::error!("could not destroy session: {e}");
                            conn.with_status(Status::InternalServerError).halt()
                        }
                    }
                }
            }
        });

    trillium_smol::run((
        CookiesHandler::new(),
        manager.handler(),
        manager.csrf_handler(),
        router,
    ));

    if let Err(e) = future::block_on(manager.close()) {
        log::error!("could not close session manager: {e}");
    }
}
