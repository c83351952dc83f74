//! Axum adapter for the liveframe engine.
//!
//! Routes:
//! - `GET /pages/{page}`: initial HTML render with session cookie issuance
//! - `GET /live`: WebSocket upgrade for the bidirectional sync channel
//! - `GET /liveframe/client.js`: the embedded browser runtime
//! - `GET /admin/connections`: session and connection introspection
//! - `GET /health`: liveness probe
//! - `/public/*`: optional static asset directory

pub mod config;
pub mod handlers;
pub mod templates;

use axum::{Router, http::header, routing::get};
use liveframe_core::EventPipeline;
use liveframe_core::render::CLIENT_RUNTIME_PATH;
use std::path::PathBuf;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: EventPipeline,
    /// Session cookie lifetime in days.
    pub session_cookie_days: i64,
}

/// The embedded browser runtime, served from [`CLIENT_RUNTIME_PATH`].
pub const CLIENT_RUNTIME_JS: &str = include_str!("../assets/client.js");

/// Build the application router.
pub fn app(state: AppState, public_dir: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/", get(|| async { "liveframe" }))
        .route("/health", get(|| async { "OK" }))
        .route("/pages/{page}", get(handlers::pages::page_handler))
        .route("/live", get(handlers::ws::ws_handler))
        .route(CLIENT_RUNTIME_PATH, get(client_runtime))
        .route(
            "/admin/connections",
            get(handlers::admin::connections_handler),
        )
        .with_state(state);

    if let Some(dir) = public_dir {
        router = router.nest_service("/public", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http())
}

async fn client_runtime() -> ([(header::HeaderName, &'static str); 1], &'static str) {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLIENT_RUNTIME_JS,
    )
}
