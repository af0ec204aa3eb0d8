use super::inventory::DeviceInventory;
use super::protocol::ListAndWatchResponse;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

/// Item type of a ListAndWatch response stream.
pub type SnapshotResult = Result<ListAndWatchResponse, Status>;

/// Create the health channel for one inventory.
///
/// The reporter side may be cloned freely. The watch side owns the
/// inventory and is the only place its health is ever changed.
pub fn channel(inventory: DeviceInventory) -> (HealthReporter, HealthWatch) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        HealthReporter { tx },
        HealthWatch {
            inventory,
            updates: rx,
        },
    )
}

/// Ingress for health transitions. Never blocks.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl HealthReporter {
    /// Queue `id` to be marked unhealthy. Returns false once the owning
    /// server is gone.
    pub fn mark_unhealthy(&self, id: impl Into<String>) -> bool {
        self.tx.send(id.into()).is_ok()
    }
}

/// What ended a [`HealthWatch::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Stop fired; the final all-unhealthy snapshot was sent.
    Stopped,
    /// A newer subscription took over.
    Superseded,
    /// The subscriber went away.
    Disconnected,
}

/// Consumer side: inventory plus its health inbox.
#[derive(Debug)]
pub struct HealthWatch {
    inventory: DeviceInventory,
    updates: mpsc::UnboundedReceiver<String>,
}

impl HealthWatch {
    /// Drive one subscription: send the current snapshot, then one per
    /// health transition, then a final all-unhealthy snapshot when `stop`
    /// fires. Nothing is sent after that. `superseded` ends the
    /// subscription without a final snapshot.
    pub async fn run(
        &mut self,
        stop: &CancellationToken,
        superseded: &CancellationToken,
        out: &mpsc::Sender<SnapshotResult>,
    ) -> StreamEnd {
        if stop.is_cancelled() {
            self.send_final(out).await;
            return StreamEnd::Stopped;
        }
        if superseded.is_cancelled() {
            return StreamEnd::Superseded;
        }
        if out.send(Ok(self.inventory.snapshot())).await.is_err() {
            return StreamEnd::Disconnected;
        }

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    self.send_final(out).await;
                    return StreamEnd::Stopped;
                }

                _ = superseded.cancelled() => {
                    debug!("ListAndWatch subscription superseded");
                    return StreamEnd::Superseded;
                }

                Some(id) = self.updates.recv() => {
                    if !self.inventory.mark_unhealthy(&id) {
                        warn!("Health update for unknown device '{}' ignored", id);
                        continue;
                    }
                    info!("Device '{}' marked unhealthy", id);
                    if out.send(Ok(self.inventory.snapshot())).await.is_err() {
                        return StreamEnd::Disconnected;
                    }
                }

                _ = out.closed() => {
                    debug!("ListAndWatch subscriber disconnected");
                    return StreamEnd::Disconnected;
                }
            }
        }
    }

    async fn send_final(&mut self, out: &mpsc::Sender<SnapshotResult>) {
        debug!("ListAndWatch stop: mark all devices unhealthy");
        self.inventory.mark_all_unhealthy();
        // Best effort; the subscriber may already be gone
        let _ = out.send(Ok(self.inventory.snapshot())).await;
    }
}
