//! End-to-end live channel tests.
//!
//! These run the full axum server on 127.0.0.1:0 and drive it with real
//! WebSocket connections: register/event flow, change-detection suppression,
//! navigation, redirect commands, reconnect rebinding, and error reporting.

use futures::{SinkExt, StreamExt};
use liveframe_core::command::Command;
use liveframe_core::handler::{EventInput, HandlerOutput, HandlerRegistry};
use liveframe_core::render::DeltaRenderer;
use liveframe_core::{EventPipeline, SessionStore};
use liveframe_server::templates::FsTemplates;
use liveframe_server::{AppState, app};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    store: Arc<SessionStore>,
    _shutdown: oneshot::Sender<()>,
    _tmp: tempfile::TempDir,
}

fn test_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("counter", |input: &EventInput| {
        let n = input.payload.get("n").cloned().unwrap_or(json!(0));
        Ok(HandlerOutput::from_value(json!({
            "title": "Counter",
            "n": n,
        })))
    });
    registry.register("login", |input: &EventInput| {
        if input.event == "login" {
            let email = input
                .payload
                .get("email")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            if input.payload.get("password") == Some(&json!("secret")) {
                return Ok(HandlerOutput {
                    variables: Default::default(),
                    commands: vec![Command::Redirect {
                        location: "/pages/counter".to_string(),
                    }],
                });
            }
            return Ok(HandlerOutput::from_value(json!({
                "title": "Login",
                "error": "Invalid email or password",
                "email": email,
            })));
        }
        Ok(HandlerOutput::from_value(json!({
            "title": "Login",
            "error": null,
        })))
    });
    registry
}

async fn start_test_server() -> TestServer {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(
        tmp.path().join("counter.html"),
        "<html><head><title>Counter</title></head><body><p id=\"n\">{{n}}</p></body></html>",
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("login.html"),
        "<html><head><title>Login</title></head><body><p>{{error}}</p></body></html>",
    )
    .unwrap();

    let store = Arc::new(SessionStore::new());
    let renderer = DeltaRenderer::new(Arc::new(FsTemplates::new(tmp.path())));
    let pipeline = EventPipeline::new(store.clone(), Arc::new(test_registry()), renderer);
    let router = app(
        AppState {
            pipeline,
            session_cookie_days: 30,
        },
        None,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        store,
        _shutdown: shutdown_tx,
        _tmp: tmp,
    }
}

async fn connect_ws(addr: SocketAddr, session_id: &str) -> WsStream {
    let mut request = format!("ws://{addr}/live").into_client_request().unwrap();
    request.headers_mut().insert(
        "Cookie",
        format!("sessionId={session_id}").parse().unwrap(),
    );
    let (ws, _) = connect_async(request).await.expect("ws connect failed");
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn register(ws: &mut WsStream, page: &str) {
    send_json(ws, json!({ "type": "register", "currentPage": page })).await;
}

async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

#[tokio::test]
async fn event_produces_update_with_head_metadata() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-update").await;

    register(&mut ws, "counter").await;
    send_json(
        &mut ws,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 7 } }),
    )
    .await;

    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "update");
    assert!(msg["html"].as_str().unwrap().contains("<p id=\"n\">7</p>"));
    assert_eq!(msg["head"]["title"], "Counter");
}

#[tokio::test]
async fn identical_output_is_suppressed() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-suppress").await;
    register(&mut ws, "counter").await;

    let event =
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 1 } });
    send_json(&mut ws, event.clone()).await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "update");

    send_json(&mut ws, event).await;
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn navigation_renders_even_when_unchanged() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-nav").await;
    register(&mut ws, "login").await;

    let navigate = json!({
        "type": "event",
        "page": "login",
        "eventType": "navigate",
        "payload": { "targetPage": "counter" },
    });
    send_json(&mut ws, navigate.clone()).await;
    assert_eq!(recv_json(&mut ws).await["type"], "update");
    send_json(&mut ws, navigate).await;
    assert_eq!(recv_json(&mut ws).await["type"], "update");
}

#[tokio::test]
async fn back_navigation_replays_prior_view() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-replay").await;
    register(&mut ws, "counter").await;

    send_json(
        &mut ws,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 42 } }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["type"], "update");

    // back-navigation to the page reconstructs the n=42 view, not a reset
    send_json(
        &mut ws,
        json!({
            "type": "event",
            "page": "login",
            "eventType": "navigate",
            "payload": { "targetPage": "counter" },
        }),
    )
    .await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "update");
    assert!(msg["html"].as_str().unwrap().contains("42"));
}

#[tokio::test]
async fn redirect_command_arrives_without_update() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-redirect").await;
    register(&mut ws, "login").await;

    send_json(
        &mut ws,
        json!({
            "type": "event",
            "page": "login",
            "eventType": "login",
            "payload": { "email": "a@b.com", "password": "secret" },
        }),
    )
    .await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "command");
    assert_eq!(msg["command"], "redirect");
    assert_eq!(msg["location"], "/pages/counter");
    assert_silent(&mut ws).await;

    // the terminated pipeline left no page state behind
    assert!(server.store.page_state("sess-redirect", "login").await.is_empty());
}

#[tokio::test]
async fn failed_login_renders_error_and_caches_state() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-login").await;
    register(&mut ws, "login").await;

    send_json(
        &mut ws,
        json!({
            "type": "event",
            "page": "login",
            "eventType": "login",
            "payload": { "email": "a@b.com", "password": "bad" },
        }),
    )
    .await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "update");
    assert!(
        msg["html"]
            .as_str()
            .unwrap()
            .contains("Invalid email or password")
    );
    assert_silent(&mut ws).await;

    let cached = server.store.page_state("sess-login", "login").await;
    assert_eq!(cached["error"], "Invalid email or password");
    assert_eq!(cached["email"], "a@b.com");
}

#[tokio::test]
async fn reconnect_rebinds_session_to_new_channel() {
    let server = start_test_server().await;

    let mut first = connect_ws(server.addr, "sess-rebind").await;
    register(&mut first, "counter").await;

    let mut second = connect_ws(server.addr, "sess-rebind").await;
    register(&mut second, "counter").await;

    // one session, one live channel, despite two registrations
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = server.store.stats().await;
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.connected, 1);

    // updates flow to the new channel only
    send_json(
        &mut second,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 9 } }),
    )
    .await;
    assert_eq!(recv_json(&mut second).await["type"], "update");
    assert_silent(&mut first).await;
}

#[tokio::test]
async fn disconnect_keeps_session_state() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-survive").await;
    register(&mut ws, "counter").await;
    send_json(
        &mut ws,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 5 } }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["type"], "update");

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(server.store.contains("sess-survive").await);
    assert_eq!(
        server.store.page_state("sess-survive", "counter").await["n"],
        json!(5)
    );
    assert!(server.store.channel_for("sess-survive").await.is_none());
}

#[tokio::test]
async fn event_before_register_reports_session_not_found() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-unknown").await;

    send_json(
        &mut ws,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": {} }),
    )
    .await;
    let msg = recv_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert!(
        msg["message"].as_str().unwrap().contains("session not found"),
        "message: {}",
        msg["message"]
    );
}

#[tokio::test]
async fn handler_error_is_nonfatal_to_channel() {
    let server = start_test_server().await;
    let mut ws = connect_ws(server.addr, "sess-err").await;
    register(&mut ws, "counter").await;

    // unknown page: error message, channel stays usable
    send_json(
        &mut ws,
        json!({ "type": "event", "page": "nowhere", "eventType": "tick", "payload": {} }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["type"], "error");

    send_json(
        &mut ws,
        json!({ "type": "event", "page": "counter", "eventType": "tick", "payload": { "n": 1 } }),
    )
    .await;
    assert_eq!(recv_json(&mut ws).await["type"], "update");
}

#[tokio::test]
async fn upgrade_without_cookie_is_rejected() {
    let server = start_test_server().await;
    let request = format!("ws://{}/live", server.addr)
        .into_client_request()
        .unwrap();
    let err = connect_async(request).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
