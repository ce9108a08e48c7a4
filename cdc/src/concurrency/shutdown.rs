//! Graceful shutdown signaling for the replicator worker.
//!
//! A single broadcast channel connects the public handle with the worker.
//! The worker observes the signal between events and during the reconnect
//! backoff; a commit already in flight always runs to completion, since
//! aborting it could duplicate work on restart.

use tokio::sync::watch;

const SHUTDOWN_DEFAULT: bool = false;

/// Transmitter side of the shutdown channel.
///
/// Requesting shutdown is idempotent: repeated calls after the first are
/// no-ops, and a request made after the worker already exited is harmless.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals all subscribed workers to shut down.
    pub fn shutdown(&self) {
        // Send only fails when every receiver is gone, which means the
        // worker has already terminated.
        let _ = self.0.send(true);
    }

    /// Creates a new receiver subscribed to this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns true if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is requested.
    ///
    /// Returns immediately if the request was already made, and also when
    /// the transmitter is dropped, which only happens when the owning handle
    /// goes away.
    pub async fn requested(&mut self) {
        if *self.0.borrow_and_update() {
            return;
        }
        let _ = self.0.wait_for(|&requested| requested).await;
    }
}

/// Creates a connected shutdown channel pair.
pub fn create_shutdown() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(SHUTDOWN_DEFAULT);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_is_observed_by_all_receivers() {
        let (tx, mut rx1) = create_shutdown();
        let mut rx2 = tx.subscribe();

        assert!(!rx1.is_shutdown());

        tx.shutdown();
        tx.shutdown();

        rx1.requested().await;
        rx2.requested().await;
        assert!(rx1.is_shutdown());
        assert!(rx2.is_shutdown());
    }

    #[tokio::test]
    async fn dropped_transmitter_releases_waiters() {
        let (tx, mut rx) = create_shutdown();
        drop(tx);

        // Must not hang even though no shutdown was ever requested.
        rx.requested().await;
    }
}
