use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::{actor, ClientId, CLOSE_POLICY_VIOLATION};

/// Query parameters for WebSocket connection.
/// The client id is supplied out-of-band as `?id=`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub id: Option<String>,
}

/// GET /ws?id=CLIENT_ID
/// WebSocket upgrade endpoint. A missing, blank or reserved id upgrades then
/// immediately closes with 1008 (policy violation). Otherwise spawns an actor
/// for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = match params.id.as_deref().and_then(ClientId::parse) {
        Some(id) if id.is_reserved() => {
            tracing::warn!(
                client_id = %id,
                close_code = CLOSE_POLICY_VIOLATION,
                "WebSocket handshake with reserved client id refused"
            );
            return refuse(ws, "reserved client id");
        }
        Some(id) => id,
        None => {
            tracing::warn!(
                close_code = CLOSE_POLICY_VIOLATION,
                "WebSocket handshake without client id refused"
            );
            return refuse(ws, "missing client id");
        }
    };

    tracing::info!(client_id = %client_id, "WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_identified(socket, state, client_id))
}

/// Upgrade the connection, then immediately close with the policy code.
fn refuse(ws: WebSocketUpgrade, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}

async fn handle_identified(socket: WebSocket, state: AppState, client_id: ClientId) {
    actor::run_connection(socket, state, client_id).await;
}
