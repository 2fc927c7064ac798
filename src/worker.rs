//! Top-level wiring: owns every long-lived task for one worker process.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{QueueMode, WorkerConfig};
use crate::dispatcher::Dispatcher;
use crate::process::{ChromeSupervisor, PortRegistry};
use crate::queue::{HttpQueueClient, LocalQueueClient, QueueClient};
use crate::session::SessionManager;
use crate::{profile, shutdown, status};

pub struct Worker {
    config: Arc<WorkerConfig>,
    worker_id: String,
    ports: Arc<PortRegistry>,
    sessions: Arc<SessionManager>,
    supervisor: Arc<ChromeSupervisor>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let ports = Arc::new(PortRegistry::new(config.port_start, config.port_end));
        Self {
            worker_id: format!("w-{}", Uuid::new_v4()),
            config: Arc::new(config),
            ports,
            sessions: Arc::new(SessionManager::new()),
            supervisor: Arc::new(ChromeSupervisor::new()),
        }
    }

    /// Run every long-lived task until the process receives a shutdown
    /// signal, then drain gracefully within the global deadline (§5).
    pub async fn run(self) -> crate::error::Result<()> {
        let (shutdown_tx, shutdown_rx) = shutdown::channel();

        let mut local_status_client: Option<Arc<LocalQueueClient>> = None;
        let queue: Arc<dyn QueueClient> = match self.config.queue_mode() {
            QueueMode::Remote => Arc::new(HttpQueueClient::new(self.config.queue_request_url.clone())),
            QueueMode::LocalFilesystem => {
                let client = Arc::new(LocalQueueClient::new(
                    std::env::current_dir().unwrap_or_else(|_| ".".into()),
                ));
                local_status_client = Some(Arc::clone(&client));
                client
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(
            self.worker_id.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.ports),
            Arc::clone(&self.sessions),
            Arc::clone(&self.supervisor),
            queue,
        ));

        let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));
        let sweep_task = tokio::spawn(Self::sweep_loop(
            Arc::clone(&self.config),
            Arc::clone(&self.ports),
            Arc::clone(&self.sessions),
            Arc::clone(&self.supervisor),
            shutdown_rx.clone(),
        ));
        let janitor_task = tokio::spawn(Self::janitor_loop(
            Arc::clone(&self.config),
            Arc::clone(&self.sessions),
            shutdown_rx.clone(),
        ));
        let status_task = tokio::spawn(status::run(
            Duration::from_secs(self.config.status_log_interval_sec),
            Arc::clone(&self.ports),
            Arc::clone(&self.sessions),
            shutdown_rx.clone(),
        ));
        let local_status_query_task = local_status_client.map(|client| {
            tokio::spawn(Self::local_status_query_loop(
                client,
                Arc::clone(&self.ports),
                Arc::clone(&self.sessions),
                shutdown_rx.clone(),
            ))
        });

        shutdown::wait_for_signal(shutdown_tx).await;
        tracing::info!("shutdown signal received; draining");

        let drain = async {
            let _ = dispatcher_task.await;
            let _ = sweep_task.await;
            let _ = janitor_task.await;
            let _ = status_task.await;
            if let Some(task) = local_status_query_task {
                let _ = task.await;
            }
        };

        if tokio::time::timeout(shutdown::SHUTDOWN_DEADLINE, drain).await.is_err() {
            tracing::warn!("shutdown deadline exceeded; terminating remaining sessions forcibly");
            self.force_kill_all().await;
        }

        Ok(())
    }

    async fn sweep_loop(
        config: Arc<WorkerConfig>,
        ports: Arc<PortRegistry>,
        sessions: Arc<SessionManager>,
        supervisor: Arc<ChromeSupervisor>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(20));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reclaimed = ports.sweep_stale_reservations();
                    if !reclaimed.is_empty() {
                        tracing::info!(?reclaimed, "reclaimed stale port reservations");
                    }
                    sessions.sweep(&config, &supervisor, &ports).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        Self::terminate_all_for_shutdown(&config, &ports, &sessions, &supervisor).await;
                        return;
                    }
                }
            }
        }
    }

    async fn terminate_all_for_shutdown(
        config: &WorkerConfig,
        ports: &PortRegistry,
        sessions: &SessionManager,
        supervisor: &ChromeSupervisor,
    ) {
        for session_id in sessions.list_ids().await {
            let Some(session) = sessions.lookup(&session_id).await else { continue };
            let reason = crate::session::model::TerminationReason::Shutdown;
            let exit_code = match supervisor.terminate(&session, config, reason).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(error = %e, session_id, "shutdown termination reported an error; port released anyway");
                    None
                }
            };
            ports.release(session.debug_port, &session_id);
            sessions.finish_termination(&session_id, reason, exit_code).await;
        }
    }

    /// Local-mode-only task: watch for the status-query trigger file and
    /// emit an immediate status snapshot when it appears (§6).
    async fn local_status_query_loop(
        client: Arc<LocalQueueClient>,
        ports: Arc<PortRegistry>,
        sessions: Arc<SessionManager>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if client.poll_status_request().await {
                        status::emit_snapshot(&ports, &sessions).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn janitor_loop(config: Arc<WorkerConfig>, sessions: Arc<SessionManager>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = Duration::from_secs(config.profile_cleanup_interval_sec);
        let max_age = Duration::from_secs(config.profile_max_age_hours * 3600);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    profile::sweep_once(&config.profile_root, max_age, &sessions, config.cleanup_profiles_cmd.as_deref()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn force_kill_all(&self) {
        for session_id in self.sessions.list_ids().await {
            if let Some(session) = self.sessions.lookup(&session_id).await {
                let reason = crate::session::model::TerminationReason::Shutdown;
                let exit_code = match self.supervisor.terminate(&session, &self.config, reason).await {
                    Ok(code) => code,
                    Err(e) => {
                        tracing::warn!(error = %e, session_id, "forced termination reported an error; port released anyway");
                        None
                    }
                };
                self.ports.release(session.debug_port, &session_id);
                self.sessions.finish_termination(&session_id, reason, exit_code).await;
            }
        }
    }
}
