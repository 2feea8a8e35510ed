//! Graceful shutdown for a ring node
//!
//! SIGINT and SIGTERM are turned into a [`ShutdownSignal`] broadcast. On the
//! first signal the coordinator asks the node to leave the ring so its items
//! reach the successor before the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::membership::LeaveOutcome;
use crate::node::RingNode;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Manual shutdown request
    Manual,
}

impl ShutdownSignal {
    fn reason(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT received",
            ShutdownSignal::Terminate => "SIGTERM received",
            ShutdownSignal::Manual => "Manual shutdown",
        }
    }
}

/// Shutdown coordinator that runs `leave` once per process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    is_shutting_down: Arc<AtomicBool>,
    /// Upper bound for the leave hand-off
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            grace,
        }
    }

    /// Start listening for process signals
    pub fn start(&self) {
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            Self::handle_signals(shutdown_tx).await;
        });
    }

    #[cfg(unix)]
    async fn handle_signals(shutdown_tx: broadcast::Sender<ShutdownSignal>) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut interrupt, mut terminate) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers; falling back to Ctrl+C");
                Self::handle_ctrl_c(shutdown_tx).await;
                return;
            }
        };

        loop {
            let signal = tokio::select! {
                _ = interrupt.recv() => ShutdownSignal::Interrupt,
                _ = terminate.recv() => ShutdownSignal::Terminate,
            };
            tracing::info!("{}, initiating graceful shutdown", signal.reason());
            let _ = shutdown_tx.send(signal);
        }
    }

    #[cfg(not(unix))]
    async fn handle_signals(shutdown_tx: broadcast::Sender<ShutdownSignal>) {
        Self::handle_ctrl_c(shutdown_tx).await;
    }

    async fn handle_ctrl_c(shutdown_tx: broadcast::Sender<ShutdownSignal>) {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            let _ = shutdown_tx.send(ShutdownSignal::Interrupt);
        }
    }

    /// Request shutdown without a process signal
    pub fn trigger(&self, signal: ShutdownSignal) {
        let _ = self.shutdown_tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::Relaxed)
    }

    /// Wait for the first shutdown signal, then leave the ring.
    ///
    /// Returns `None` when another caller already ran the leave or the hand-off
    /// did not finish within the grace period.
    pub async fn leave_on_shutdown(&self, node: Arc<RingNode>) -> Option<LeaveOutcome> {
        let mut rx = self.subscribe();
        let signal = rx.recv().await.unwrap_or(ShutdownSignal::Manual);
        self.shutdown(node, signal).await
    }

    /// Leave the ring once, bounded by the grace period
    pub async fn shutdown(&self, node: Arc<RingNode>, signal: ShutdownSignal) -> Option<LeaveOutcome> {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return None;
        }
        tracing::info!(node_id = node.id(), reason = signal.reason(), "Initiating graceful shutdown");

        match timeout(self.grace, node.leave()).await {
            Ok(Ok(outcome)) => {
                tracing::info!(node_id = node.id(), ?outcome, "Graceful shutdown completed");
                Some(outcome)
            }
            Ok(Err(e)) => {
                tracing::error!(node_id = node.id(), error = %e, "Leave failed during shutdown");
                None
            }
            Err(_) => {
                tracing::warn!(node_id = node.id(), "Shutdown grace period expired before leave completed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeSettings;
    use crate::rpc::LocalNetwork;
    use crate::store::MemoryNodeStore;
    use crate::ring::NodeState;

    fn node(network: &Arc<LocalNetwork>, id: u64) -> Arc<RingNode> {
        RingNode::new(
            NodeSettings::new(id, format!("node-{id}")).with_timeout(Duration::from_millis(300)),
            network.clone(),
            Arc::new(MemoryNodeStore::new()),
        )
    }

    #[tokio::test]
    async fn test_manual_signal_makes_node_leave() {
        let network = Arc::new(LocalNetwork::new());
        let first = node(&network, 10);
        let second = node(&network, 20);
        first.join_first().await.unwrap();
        second.join("node-10").await.unwrap();

        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let second = Arc::clone(&second);
            tokio::spawn(async move { coordinator.leave_on_shutdown(second).await })
        };
        tokio::task::yield_now().await;
        while coordinator.shutdown_tx.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        coordinator.trigger(ShutdownSignal::Manual);

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Some(LeaveOutcome::Departed { successor: 10, .. })));
        assert_eq!(second.state().await, NodeState::Left);
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_runs_leave_once() {
        let network = Arc::new(LocalNetwork::new());
        let solo = node(&network, 10);
        solo.join_first().await.unwrap();

        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        assert_eq!(
            coordinator.shutdown(Arc::clone(&solo), ShutdownSignal::Manual).await,
            Some(LeaveOutcome::Solitary)
        );
        assert_eq!(coordinator.shutdown(solo, ShutdownSignal::Manual).await, None);
    }
}
