//! WebSocket endpoint: init snapshot on connect, then live event fan-out.
//!
//! Events are written straight to the socket. A client that stops draining
//! stalls its own send, which lets its broadcast receiver lag and shed the
//! oldest events; publishers are never held up. A send that cannot finish
//! within the liveness window drops the connection.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use super::ApiState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let mut events = state.bus.subscribe();
    let (mut sink, mut stream) = socket.split();
    let liveness = state.config.ws_liveness_timeout;

    match init_snapshot(&state).await {
        Ok(text) => {
            if send_text(&mut sink, text, liveness).await.is_err() {
                return;
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to build init snapshot"),
    }

    let mut last_inbound = Instant::now();
    let mut liveness_check = tokio::time::interval(liveness / 2);
    liveness_check.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if send_text(&mut sink, text, liveness).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "websocket client lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    last_inbound = Instant::now();
                    if text.as_str() == "ping"
                        && send_text(&mut sink, r#"{"type":"pong"}"#.to_string(), liveness)
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    last_inbound = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = liveness_check.tick() => {
                if last_inbound.elapsed() > liveness {
                    tracing::debug!("dropping silent websocket client");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn send_text(
    sink: &mut SplitSink<WebSocket, Message>,
    text: String,
    limit: std::time::Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(limit, sink.send(Message::Text(text.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

/// Full state snapshot sent once per connection, before any live events.
async fn init_snapshot(state: &ApiState) -> Result<String, sqlx::Error> {
    let tasks = state.store.list_root_tasks().await?;
    let stats = state.store.stats().await?;
    let services = state.services.list().await;
    let init = json!({
        "type": "init",
        "tasks": tasks,
        "stats": stats,
        "services": services,
    });
    Ok(init.to_string())
}
