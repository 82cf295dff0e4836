use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::{response::IntoResponse, routing::get, Router};

use anyhow::anyhow;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::model::clipboard::ClipboardItem;
use crate::state::AppState;

// ------------------------------------------------------------
// ROUTER
// ------------------------------------------------------------
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/{client_id}", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

// ------------------------------------------------------------
// WEBSOCKET HANDLER (SPLIT SOCKET)
// ------------------------------------------------------------
async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(32);

    info!(client_id = client_id.as_str(), "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match timeout(Duration::from_secs(5), ws_sender.send(msg)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => break,
                Err(_) => continue,
            }
        }
    });

    // --- broadcast fan-in ---
    let mut items = state.hub.subscribe();
    let fanout_tx = tx.clone();
    let fanout_client = client_id.clone();
    let fanout = tokio::spawn(async move {
        loop {
            match items.recv().await {
                Ok(item) => {
                    if send_json(&fanout_tx, item_event(&item)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = fanout_client.as_str(), skipped, "websocket lagged behind clipboard feed");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- inbound frames ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(raw) => {
                debug!(client_id = client_id.as_str(), len = raw.as_str().len(), "incoming ws message");
                let reply = WsMessage::Text(echo_reply(raw.as_str()).into());
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    fanout.abort();
    drop(tx);
    let _ = writer.await;
    info!(client_id = client_id.as_str(), "websocket disconnected");
}

fn echo_reply(text: &str) -> String {
    format!("Clipboard sync: {text}")
}

fn item_event(item: &ClipboardItem) -> serde_json::Value {
    json!({
        "type": "clipboard_item",
        "item": item,
    })
}

// ------------------------------------------------------------
// SEND JSON WRAPPER
// ------------------------------------------------------------
async fn send_json(
    sender: &mpsc::Sender<WsMessage>,
    value: serde_json::Value,
) -> anyhow::Result<()> {
    let msg = WsMessage::Text(value.to_string().into());

    match timeout(Duration::from_secs(2), sender.send(msg)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(anyhow!("ws channel closed")),
        Err(_) => Ok(()),
    }
}
