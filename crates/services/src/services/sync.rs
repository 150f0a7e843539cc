//! Background service that drains the pending queue once the server is
//! reachable again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use super::coordinator::{Coordinator, CoordinatorError, ReadyMode, SessionPhase};

/// Periodically probes the server and replays deferred writes through the
/// coordinator. Conflict handling lives in the coordinator; this service
/// only decides when a replay attempt is worth making.
pub struct SyncService {
    coordinator: Arc<Coordinator>,
    poll_interval: Duration,
}

impl SyncService {
    /// Spawn the background sync service.
    pub async fn spawn(
        coordinator: Arc<Coordinator>,
        poll_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = Self {
            coordinator,
            poll_interval,
        };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting sync service with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.drain_if_needed().await {
                error!("Error draining pending queue: {}", e);
            }
        }
    }

    /// One tick: skip when there is nothing to do or the server is still
    /// down, otherwise hand the queue to the coordinator.
    async fn drain_if_needed(&self) -> Result<(), CoordinatorError> {
        let mode = match self.coordinator.phase().await {
            SessionPhase::Ready(mode) => mode,
            _ => {
                debug!("Sync: no active session");
                return Ok(());
            }
        };

        let pending = self.coordinator.pending_count().await;
        if pending == 0 && mode == ReadyMode::Online {
            return Ok(());
        }

        if !self.coordinator.server_reachable().await {
            debug!(pending, "Sync: server still unreachable");
            return Ok(());
        }

        let report = self.coordinator.flush_pending().await?;
        if report.flushed > 0 {
            info!(
                flushed = report.flushed,
                remaining = report.remaining,
                "Sync: replayed deferred writes"
            );
        }
        Ok(())
    }
}
