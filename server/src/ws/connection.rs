use axum::extract::ws::{CloseFrame, Message};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::ws::envelope::Envelope;
use crate::ws::{ClientId, ConnectionSender};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a live connection. Identity is the allocation, so two
/// handles for the same client id can still be told apart.
pub type ConnectionHandle = Arc<Connection>;

/// Lifecycle of a connection as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Failure to hand a frame to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection for {0} is closed")]
    Closed(ClientId),
}

/// One accepted WebSocket connection.
///
/// Outbound frames go through `tx` into the connection's single writer task,
/// which keeps writes to the socket serialized no matter how many tasks send.
#[derive(Debug)]
pub struct Connection {
    serial: u64,
    client_id: ClientId,
    tx: ConnectionSender,
    alive: AtomicBool,
    state: AtomicU8,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(client_id: ClientId, tx: ConnectionSender) -> ConnectionHandle {
        Arc::new(Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            client_id,
            tx,
            alive: AtomicBool::new(true),
            state: AtomicU8::new(ConnectionState::Open as u8),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Open and still attached to a running writer task.
    pub fn is_reachable(&self) -> bool {
        self.state() == ConnectionState::Open && !self.tx.is_closed()
    }

    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        self.tx
            .send(msg)
            .map_err(|_| TransportError::Closed(self.client_id.clone()))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.send(Message::Text(envelope.encode().into()))
    }

    /// Heartbeat reply received.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Send a close frame and stop the connection's reader loop.
    ///
    /// Only the first call has any effect.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let was_open = self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !was_open {
            return Ok(());
        }

        let result = self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
        self.shutdown.cancel();
        result
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.shutdown.cancel();
    }

    /// Resolves once the connection has been asked to shut down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}
