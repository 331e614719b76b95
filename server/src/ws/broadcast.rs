use axum::extract::ws::Message;

use super::envelope::Envelope;
use super::{ClientId, ConnectionRegistry};

/// Why an envelope addressed to a client id was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("client '{0}' is not connected")]
    UnknownTarget(ClientId),
    #[error("client '{0}' is not reachable")]
    Unreachable(ClientId),
}

/// Send an envelope to the connection currently registered under `client_id`.
pub fn send_to(
    registry: &ConnectionRegistry,
    client_id: &ClientId,
    envelope: &Envelope,
) -> Result<(), RoutingError> {
    let conn = registry
        .lookup(client_id)
        .ok_or_else(|| RoutingError::UnknownTarget(client_id.clone()))?;

    if !conn.is_reachable() {
        return Err(RoutingError::Unreachable(client_id.clone()));
    }

    conn.send_envelope(envelope)
        .map_err(|_| RoutingError::Unreachable(client_id.clone()))
}

/// Broadcast an envelope to every connected client. Returns how many
/// connections accepted the frame.
pub fn broadcast_to_all(registry: &ConnectionRegistry, envelope: &Envelope) -> usize {
    let msg = Message::Text(envelope.encode().into());

    registry
        .connections()
        .iter()
        .filter(|conn| conn.is_reachable())
        .filter(|conn| conn.send(msg.clone()).is_ok())
        .count()
}
