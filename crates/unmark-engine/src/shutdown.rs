//! Signal-driven graceful shutdown.
//!
//! The first SIGINT, SIGTERM or SIGQUIT cancels the shared token. The prefix
//! loop and the pipeline observe the token; work already handed to an action
//! finishes, nothing new starts.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the run's cancellation token.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown.
    pub fn trigger(&self, pid: u32, reason: &str) {
        if !self.token.is_cancelled() {
            info!(pid, reason, "received shutdown request, shutting down");
        }
        self.token.cancel();
    }

    /// Spawn a task that triggers shutdown on the first termination signal.
    pub fn listen_for_signals(&self, pid: u32) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                reason = wait_for_signal() => this.trigger(pid, reason),
                _ = this.token.cancelled() => {}
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut term, mut quit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(term), Ok(quit)) => (term, quit),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "cannot install signal handlers, only SIGINT is handled");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
