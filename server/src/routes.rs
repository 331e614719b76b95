use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ws::broadcast::{broadcast_to_all, send_to};
use crate::ws::envelope::{Envelope, MessageKind, SERVER_SENDER};
use crate::ws::handler as ws_handler;
use crate::ws::ClientId;

/// GET /debug/clients — Ids of every connected client.
async fn list_clients(State(state): State<AppState>) -> Json<Value> {
    let clients = state.registry.list_ids();
    Json(json!({
        "count": clients.len(),
        "clients": clients,
    }))
}

/// POST /debug/ping/{id} — Send a presence ping to one client.
async fn ping_client(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let client_id = ClientId::parse(&raw_id)
        .ok_or((StatusCode::BAD_REQUEST, "Client id must not be blank".to_string()))?;

    let ping = Envelope::server(MessageKind::Ping, json!({ "reason": "debug" }));
    send_to(&state.registry, &client_id, &ping)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;

    Ok(Json(json!({ "sent": true, "to": client_id })))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// POST /debug/broadcast — Send one envelope to every connected client.
async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if req.kind.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "type must not be blank".to_string()));
    }

    let envelope = Envelope::new(req.kind, req.payload).with_from(SERVER_SENDER);
    let delivered = broadcast_to_all(&state.registry, &envelope);
    tracing::info!(kind = %envelope.kind, delivered = delivered, "Debug broadcast");

    Ok(Json(json!({ "delivered": delivered })))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerJobRequest {
    #[serde(default)]
    pub username: Option<String>,
}

/// POST /debug/job — Start a followers job, by default for the configured debug username.
async fn trigger_job(
    State(state): State<AppState>,
    body: Option<Json<TriggerJobRequest>>,
) -> (StatusCode, Json<Value>) {
    let username = body
        .and_then(|Json(req)| req.username)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| state.debug_username.clone());

    let started = state
        .jobs
        .dispatch(ClientId::server(), Some(&json!({ "username": username })))
        .is_some();

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "started": started,
            "username": username,
            "receiver": state.jobs.receiver_id(),
        })),
    )
}

/// Build the axum Router: WebSocket endpoint, health check and debug surface.
pub fn build_router(state: AppState) -> Router {
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let debug_routes = Router::new()
        .route("/debug/clients", get(list_clients))
        .route("/debug/ping/{id}", post(ping_client))
        .route("/debug/broadcast", post(broadcast))
        .route("/debug/job", post(trigger_job));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(debug_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
