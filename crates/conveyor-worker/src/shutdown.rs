//! Graceful shutdown handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown signal receiver
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Graceful shutdown coordinator
#[derive(Clone)]
pub struct ShutdownController {
    /// Broadcast sender for shutdown signal
    sender: broadcast::Sender<()>,
    /// Flag indicating if shutdown has been initiated
    is_shutting_down: Arc<AtomicBool>,
}

impl ShutdownController {
    /// Create a new shutdown controller
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> ShutdownReceiver {
        self.sender.subscribe()
    }

    /// Initiate shutdown
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.sender.send(());
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep that returns early when shutdown is initiated.
///
/// Returns true if the sleep was interrupted.
pub async fn shutdown_aware_sleep(duration: Duration, controller: &ShutdownController) -> bool {
    if controller.is_shutting_down() {
        return true;
    }
    let mut receiver = controller.subscribe();

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = receiver.recv() => true,
    }
}

/// Listen for OS shutdown signals (SIGINT, SIGTERM)
pub async fn listen_for_signals(controller: ShutdownController) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }

    controller.shutdown();
}
