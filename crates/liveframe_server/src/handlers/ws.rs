use crate::AppState;
use crate::handlers::SESSION_COOKIE;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use futures::{Sink, SinkExt, StreamExt};
use liveframe_core::handler::RequestMeta;
use liveframe_core::protocol::{ClientMessage, ServerMessage};
use liveframe_core::session::{Channel, generate_token};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// WebSocket upgrade handler for the live sync channel.
///
/// The session identity comes from the handshake's cookie; a connection
/// without one has not been through an initial page load and is rejected.
pub async fn ws_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        warn!("WebSocket connection rejected: missing session cookie");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let session_id = cookie.value().to_string();

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Deltas rendered by the pipeline arrive on this queue; the channel
    // identity is what gets detached when the client reconnects elsewhere.
    let channel_id = generate_token();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    info!(
        "WebSocket connected: session={}, channel={}",
        session_id, channel_id
    );

    loop {
        tokio::select! {
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(Message::Text(text)) => {
                        let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(parsed) => parsed,
                            Err(err) => {
                                debug!("Unparseable message from {}: {}", session_id, err);
                                if send(&mut ws_tx, &ServerMessage::error("invalid message")).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        match parsed {
                            ClientMessage::Register { current_page } => {
                                info!(
                                    "Register: session={}, page={:?}",
                                    session_id, current_page
                                );
                                state
                                    .pipeline
                                    .store()
                                    .upsert_channel(
                                        &session_id,
                                        Channel::new(channel_id.clone(), out_tx.clone()),
                                        current_page,
                                    )
                                    .await;
                            }
                            ClientMessage::Event {
                                page,
                                event_type,
                                payload,
                            } => {
                                let request = RequestMeta {
                                    method: "WS".to_string(),
                                    ..Default::default()
                                };
                                match state
                                    .pipeline
                                    .handle_event(&session_id, request, page, event_type, payload)
                                    .await
                                {
                                    Ok(outcome) => {
                                        debug!("Event outcome for {}: {:?}", session_id, outcome);
                                    }
                                    Err(err) => {
                                        info!("Event failed for {}: {}", session_id, err);
                                        if send(&mut ws_tx, &ServerMessage::error(err.to_string()))
                                            .await
                                            .is_err()
                                        {
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Client requested close");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            Some(message) = out_rx.recv() => {
                if send(&mut ws_tx, &message).await.is_err() {
                    break;
                }
            }

            else => break,
        }
    }

    // Session record and cached page state survive the disconnect; only the
    // channel mapping goes.
    state.pipeline.store().unbind_channel(&channel_id).await;

    info!(
        "WebSocket disconnected: session={}, channel={}",
        session_id, channel_id
    );
}

async fn send(
    ws_tx: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(err) => {
            warn!("Failed to serialize outbound message: {}", err);
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await.map_err(|e| {
        error!("Failed to send message: {}", e);
    })
}
