//! Heartbeat monitor: probes every registered connection on a fixed period and
//! evicts peers that left the previous probe unanswered.
//!
//! A connection's liveness flag is cleared before each probe and set again by
//! the pong. A flag still clear at the next sweep means the peer stayed silent
//! for a whole period, so a dead peer is gone after at most two periods.

use axum::extract::ws::Message;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use super::{ConnectionRegistry, CLOSE_HEARTBEAT_TIMEOUT};

/// Default probe period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

pub struct HeartbeatMonitor {
    registry: ConnectionRegistry,
    period: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: ConnectionRegistry, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Run sweeps forever. The first sweep happens one period after start.
    pub async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.sweep();
            if report.evicted > 0 {
                tracing::info!(
                    probed = report.probed,
                    evicted = report.evicted,
                    "Heartbeat sweep evicted unresponsive connections"
                );
            } else {
                tracing::debug!(probed = report.probed, "Heartbeat sweep");
            }
        }
    }

    /// Probe or evict every registered connection once.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for conn in self.registry.connections() {
            if !conn.take_alive() {
                tracing::warn!(
                    client_id = %conn.id(),
                    serial = conn.serial(),
                    "Heartbeat missed, terminating connection"
                );
                // The peer is presumed dead; a failed close changes nothing.
                let _ = conn.close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout");
                if self.registry.remove(conn.id(), &conn) {
                    report.evicted += 1;
                }
                continue;
            }

            // Send failures are left for the next sweep to evict.
            let _ = conn.send(Message::Ping(Vec::new().into()));
            report.probed += 1;
        }

        report
    }
}
