//! Broadcast-based shutdown signaling.
//!
//! A single [`ShutdownTx`] is owned by the orchestrator; every worker holds a
//! [`ShutdownRx`] and observes the signal at its suspension points. The
//! signal is level-triggered: once sent it stays visible, so late subscribers
//! and re-checks see it as well.

use tokio::sync::watch;

const SHUTDOWN_DEFAULT: bool = false;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    ///
    /// Idempotent; subsequent calls have no further effect.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }

    /// Creates a new receiver subscribed to this transmitter.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signaled.
    ///
    /// Completes immediately when the signal was already sent, or when the
    /// transmitter is gone (an orchestrator that dropped its [`ShutdownTx`]
    /// can no longer keep workers alive).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.0.clone();
        let _ = rx.wait_for(|signaled| *signaled).await;
    }
}

/// Creates a new shutdown channel pair.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(SHUTDOWN_DEFAULT);
    (ShutdownTx(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_is_level_triggered() {
        let (tx, rx) = create_shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();

        assert!(rx.is_shutdown());
        // A receiver subscribed after the fact still observes the signal.
        let late = tx.subscribe();
        late.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn wait_completes_when_transmitter_dropped() {
        let (tx, rx) = create_shutdown_channel();
        drop(tx);
        rx.wait_for_shutdown().await;
    }
}
