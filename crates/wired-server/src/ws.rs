//! WebSocket endpoint: adapts an axum socket to a [`run_bridge`] task.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use wired_proto::ClientMessage;

use crate::bridge::run_bridge;
use crate::state::SharedState;

/// Messages buffered in each direction before backpressure applies.
const CHANNEL_CAPACITY: usize = 256;

pub async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: SharedState) {
    let id = state.next_connection_id();
    log::info!("[conn {id}] connected");

    let (mut sink, mut stream) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let bridge = tokio::spawn(run_bridge(
        id,
        state.spawn_options(),
        state.config.resize_grace,
        inbound_rx,
        outbound_tx,
        state.subscribe_notices(),
    ));

    // Socket -> bridge. Dropping `inbound_tx` tells the bridge the client left.
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match ClientMessage::from_json(&text) {
                Ok(message) => {
                    if inbound_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::debug!("[conn {id}] ignoring malformed message: {e}"),
            }
        }
    });

    // Bridge -> socket, until the bridge finishes or the socket fails.
    while let Some(message) = outbound_rx.recv().await {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::warn!("[conn {id}] dropping unencodable message: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
    drop(outbound_rx);
    let _ = sink.send(Message::Close(None)).await;
    reader.abort();

    match bridge.await {
        Ok(report) => log::info!(
            "[conn {id}] disconnected (pid {:?}, {:?}, killed: {})",
            report.pid,
            report.reason,
            report.killed
        ),
        Err(e) => log::error!("[conn {id}] bridge task failed: {e}"),
    }
}
