use crate::jobs::JobBridge;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connections by client id
    pub registry: ConnectionRegistry,
    /// Followers job bridge
    pub jobs: JobBridge,
    /// Username scraped by the debug job trigger
    pub debug_username: String,
}
