use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ClientId, Connection};

/// How long the writer gets to flush a final close frame before it is aborted.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for an identified WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: handles incoming frames one at a time, in arrival order
///
/// The mpsc channel is the only path to the socket; the registry, router,
/// heartbeat and job tasks all send through the connection's cloned sender.
pub async fn run_connection(socket: WebSocket, state: AppState, client_id: ClientId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let conn = Connection::new(client_id.clone(), tx);
    let replaced = state.registry.register(client_id.clone(), conn.clone());

    tracing::info!(
        client_id = %client_id,
        serial = conn.serial(),
        replaced = replaced,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            _ = conn.closed() => {
                tracing::debug!(client_id = %client_id, serial = conn.serial(), "Connection closed by server");
                break;
            }
            next = ws_receiver.next() => next,
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_frame(text.as_bytes(), &conn, &state);
                }
                Message::Binary(data) => {
                    protocol::handle_frame(&data, &conn, &state);
                }
                Message::Pong(_) => {
                    conn.mark_alive();
                }
                Message::Ping(_) => {
                    // Pong is sent by the websocket layer itself
                }
                Message::Close(frame) => {
                    tracing::info!(
                        client_id = %client_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    client_id = %client_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(client_id = %client_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Remove this connection unless a newer one already took the id
    state.registry.remove(&client_id, &conn);

    // Let the writer flush a close frame, then make sure it is gone
    let _ = conn.send(Message::Close(None));
    conn.mark_closed();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }

    tracing::info!(
        client_id = %client_id,
        serial = conn.serial(),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
/// Stops after the first close frame.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || is_close {
            break;
        }
    }
}
