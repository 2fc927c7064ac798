//! Status task (§5, §6.1): emits one structured log line per interval
//! summarizing Port Registry occupancy and active session count.

use std::sync::Arc;
use std::time::Duration;

use crate::process::PortRegistry;
use crate::session::SessionManager;

/// Emit one structured status line: Port Registry occupancy plus active
/// session count (§6.1). Shared by the fixed-interval tick and the
/// on-demand local-mode status-query trigger (§6).
pub async fn emit_snapshot(ports: &PortRegistry, sessions: &SessionManager) {
    let snapshot = ports.snapshot();
    let active = sessions.count_active().await;
    tracing::info!(
        free = snapshot.free_count,
        reserved = snapshot.reserved,
        active_ports = snapshot.active,
        count_active = active,
        "status"
    );
}

pub async fn run(interval: Duration, ports: Arc<PortRegistry>, sessions: Arc<SessionManager>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                emit_snapshot(&ports, &sessions).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
