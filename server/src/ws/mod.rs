pub mod actor;
pub mod broadcast;
pub mod connection;
pub mod envelope;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod registry;

use serde::Serialize;
use tokio::sync::mpsc;

pub use connection::{Connection, ConnectionHandle, ConnectionState, TransportError};
pub use registry::ConnectionRegistry;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Cloned into a [`Connection`] so any task can push frames to that client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Close code sent to a connection superseded by a newer one with the same id.
pub const CLOSE_REPLACED: u16 = 4000;

/// Close code for a heartbeat eviction (going away).
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 1001;

/// Close code for a refused handshake (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Case-normalized client identifier: trimmed and lower-cased, never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Normalize a raw id; `None` if nothing remains after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.trim().to_lowercase();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Id the server itself uses as a requester.
    pub fn server() -> Self {
        Self(envelope::SERVER_SENDER.to_string())
    }

    /// True for ids only the server may use as a sender.
    pub fn is_reserved(&self) -> bool {
        self.0 == envelope::SERVER_SENDER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_normalizes() {
        let id = ClientId::parse("  Alice-TV ").unwrap();
        assert_eq!(id.as_str(), "alice-tv");
        assert_eq!(ClientId::parse("ALICE-tv"), Some(id));
    }

    #[test]
    fn test_client_id_rejects_blank() {
        assert!(ClientId::parse("").is_none());
        assert!(ClientId::parse(" \t ").is_none());
    }

    #[test]
    fn test_server_id_is_reserved() {
        assert!(ClientId::parse(" Server ").unwrap().is_reserved());
        assert!(ClientId::server().is_reserved());
        assert!(!ClientId::parse("servers").unwrap().is_reserved());
    }
}
