use liveframe_core::command::Command;
use liveframe_core::handler::{EventInput, HandlerOutput, HandlerRegistry};
use liveframe_core::render::{DeltaRenderer, Include};
use liveframe_core::{EventPipeline, LiveframeError, SessionStore};
use liveframe_server::config::Config;
use liveframe_server::templates::FsTemplates;
use liveframe_server::{AppState, app};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liveframe_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting liveframe server v{}", env!("CARGO_PKG_VERSION"));
    info!("Pages directory: {:?}", config.pages_dir);

    // Assemble the engine
    let store = Arc::new(SessionStore::new());
    let templates = FsTemplates::new(&config.pages_dir);
    let renderer = DeltaRenderer::new(Arc::new(templates)).with_includes(Arc::new(|page| {
        match page {
            "dashboard" => vec![Include::InlineCss {
                content: ".stat { font-size: 2em; font-weight: bold; }".to_string(),
            }],
            _ => Vec::new(),
        }
    }));
    let pipeline = EventPipeline::new(store.clone(), Arc::new(demo_handlers()), renderer);

    let state = AppState {
        pipeline: pipeline.clone(),
        session_cookie_days: config.session_cookie_days,
    };
    let router = app(state, config.public_dir.clone());

    // Create listener
    let addr = config.server_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    // Start staleness sweep task
    {
        let pipeline = pipeline.clone();
        let max_idle = chrono::Duration::hours(config.session_max_idle_hours);
        let interval_secs = config.sweep_interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                pipeline.sweep_sessions(max_idle).await;
            }
        });
    }

    // Run server with graceful shutdown
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("Server shut down gracefully");
}

/// Demo application: a login page and a dashboard with a live refresh counter.
fn demo_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register("login", |input: &EventInput| {
        if input.event == "login" {
            let email = input.payload.get("email").and_then(Value::as_str);
            let password = input.payload.get("password").and_then(Value::as_str);
            if let (Some(email), Some("secret")) = (email, password) {
                return Ok(HandlerOutput {
                    variables: Map::new(),
                    commands: vec![
                        Command::SetCookie {
                            name: "user".to_string(),
                            value: email.to_string(),
                            options: Default::default(),
                        },
                        Command::Redirect {
                            location: "/pages/dashboard".to_string(),
                        },
                    ],
                });
            }
            return Ok(HandlerOutput::from_value(json!({
                "title": "Login",
                "error": "Invalid email or password",
            })));
        }
        Ok(HandlerOutput::from_value(json!({
            "title": "Login",
            "error": null,
        })))
    });

    // Each handler owns its own cross-invocation state; here a counter
    // shared across all sessions viewing the dashboard.
    let refreshes = Arc::new(AtomicUsize::new(0));
    registry.register("dashboard", move |input: &EventInput| {
        let total = match input.event.as_str() {
            "refresh" => refreshes.fetch_add(1, Ordering::Relaxed) + 1,
            "onLoad" => refreshes.load(Ordering::Relaxed),
            other => {
                return Err(LiveframeError::Handler(format!(
                    "unsupported event '{other}'"
                )));
            }
        };
        let user = input
            .request
            .query
            .get("user")
            .cloned()
            .unwrap_or_else(|| "guest".to_string());
        Ok(HandlerOutput::from_value(json!({
            "title": "Dashboard",
            "user": user,
            "refreshes": total,
            "serverTime": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        })))
    });

    registry
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
