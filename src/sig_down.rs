//! Graceful-shutdown signal for the websocket listener, metrics listener,
//! and chain reconciler tasks spawned in `main`.
//!
//! A SIGTERM or SIGINT cancels a shared [`CancellationToken`]; every
//! long-lived task in `main` races its own work against
//! `token.cancelled()` so a single signal drains all of them instead of
//! each installing its own handler.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Which of the two signals triggered shutdown, for the log line that
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownCause {
    Terminate,
    Interrupt,
}

impl ShutdownCause {
    fn as_str(self) -> &'static str {
        match self {
            ShutdownCause::Terminate => "SIGTERM",
            ShutdownCause::Interrupt => "SIGINT",
        }
    }
}

/// Watches for SIGTERM/SIGINT and cancels a token shared with the
/// websocket listener, the metrics listener, and every chain reconciler
/// task so all of them stop draining connections on the same signal.
pub struct ShutdownSignal {
    watcher: TaskTracker,
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Installs the SIGTERM/SIGINT handlers and starts watching for them.
    ///
    /// Returns an error if signal registration fails (e.g. the process
    /// lacks permission to install a handler).
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let watched = token.clone();
        let watcher = TaskTracker::new();
        watcher.spawn(async move {
            let cause = tokio::select! {
                _ = sigterm.recv() => ShutdownCause::Terminate,
                _ = sigint.recv() => ShutdownCause::Interrupt,
            };
            tracing::info!(signal = cause.as_str(), "shutdown signal received, draining connections");
            watched.cancel();
        });
        watcher.close();
        Ok(Self { watcher, token })
    }

    /// Returns a clone of the shared token for a task to race its work
    /// against.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for a shutdown signal and for the watcher task itself to
    /// finish logging it.
    #[allow(dead_code)]
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.watcher.wait().await;
    }
}
