//! Process-wide graceful shutdown coordination (§5 "Cancellation").

use std::time::Duration;

use tokio::sync::watch;

/// Worker processes terminate (force-killing any stragglers) after this
/// deadline from the shutdown signal, regardless of in-flight work.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Wait for SIGTERM/SIGINT (Unix) or Ctrl+C (Windows), then flip the
/// shared shutdown flag so every task observing it can drain.
pub async fn wait_for_signal(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received Ctrl+C, shutting down"),
            Err(e) => tracing::warn!(error = %e, "failed to wait for Ctrl+C"),
        }
    }

    let _ = tx.send(true);
}
