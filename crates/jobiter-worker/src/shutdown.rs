//! Graceful shutdown flag and OS signal wiring.
//!
//! The flag is raised asynchronously (by a signal task, an operator, a test)
//! and only ever read by the interruption policy between items.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Answers "has a graceful shutdown been requested?".
pub trait ShutdownSource: Send + Sync {
    fn shutdown_requested(&self) -> bool;
}

/// Shared shutdown flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Graceful shutdown requested");
        }
    }

    /// Spawn a task that raises the flag on SIGINT, SIGTERM or SIGQUIT.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_os_handlers(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => signal.request_shutdown(),
                Err(e) => warn!(error = %e, "Failed to register signal handlers"),
            }
        })
    }
}

impl ShutdownSource for ShutdownSignal {
    fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Completes when the process receives a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Completes when the process receives a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();

        assert!(!observer.shutdown_requested());
        signal.request_shutdown();
        signal.request_shutdown();
        assert!(observer.shutdown_requested());
    }
}
