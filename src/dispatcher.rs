//! Request Dispatcher (§4.5): polls the queue, validates requests, admits
//! or defers by slot availability, and coordinates launch + callback.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::callback;
use crate::config::{QueueMode, WorkerConfig};
use crate::error::WorkerError;
use crate::process::{ChromeSupervisor, PortRegistry};
use crate::profile;
use crate::queue::{backoff, QueueClient, QueueMessage, SessionRequest, SessionResponse};
use crate::session::model::{BrowserSession, SessionState};
use crate::session::SessionManager;

const QUEUE_BATCH_MAX: usize = 4;
const QUEUE_LONG_POLL: Duration = Duration::from_secs(20);
const NO_SLOTS_SLEEP: Duration = Duration::from_millis(300);

pub struct Dispatcher {
    worker_id: String,
    config: Arc<WorkerConfig>,
    ports: Arc<PortRegistry>,
    sessions: Arc<SessionManager>,
    supervisor: Arc<ChromeSupervisor>,
    queue: Arc<dyn QueueClient>,
    http: reqwest::Client,
    pending_launches: AtomicUsize,
}

impl Dispatcher {
    pub fn new(
        worker_id: String,
        config: Arc<WorkerConfig>,
        ports: Arc<PortRegistry>,
        sessions: Arc<SessionManager>,
        supervisor: Arc<ChromeSupervisor>,
        queue: Arc<dyn QueueClient>,
    ) -> Self {
        Self {
            worker_id,
            config,
            ports,
            sessions,
            supervisor,
            queue,
            http: reqwest::Client::new(),
            pending_launches: AtomicUsize::new(0),
        }
    }

    /// Run the dispatch loop until `shutdown` fires (§5 "Cancellation").
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = self.iterate() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Expose a single iteration for integration tests that need
    /// deterministic, uninterleaved control over the dispatch loop.
    pub async fn iterate_for_test(&self) {
        self.iterate().await
    }

    /// One dispatch iteration (§4.5 steps 1-8).
    async fn iterate(&self) {
        let slots = self.available_slots().await;
        if slots == 0 {
            tokio::time::sleep(NO_SLOTS_SLEEP).await;
            return;
        }

        let batch = slots.min(QUEUE_BATCH_MAX);
        let visibility = crate::queue::default_visibility_timeout(self.config.devtools_wait());
        let messages = match self.queue.receive(batch, QUEUE_LONG_POLL, visibility).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "queue receive failed");
                return;
            }
        };

        for message in messages {
            self.handle_message(message).await;
        }
    }

    async fn available_slots(&self) -> usize {
        let active = self.sessions.count_active().await;
        let pending = self.pending_launches.load(Ordering::Relaxed);
        self.config.max_sessions.saturating_sub(active).saturating_sub(pending)
    }

    async fn handle_message(&self, message: QueueMessage) {
        let request = match SessionRequest::parse(&message.body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "poison message; deleting");
                let _ = self.queue.delete(&message.receipt).await;
                return;
            }
        };

        if request.is_delete() {
            self.handle_delete(&message, &request).await;
            return;
        }

        self.handle_launch(message, request).await;
    }

    /// §4.5 step 4: delete action.
    async fn handle_delete(&self, message: &QueueMessage, request: &SessionRequest) {
        let session_id = request.session_id.as_deref().expect("validated on parse");
        let Some(session) = self.sessions.lookup(session_id).await else {
            let _ = self.queue.extend_visibility(&message.receipt, backoff::RELEASE_IMMEDIATELY).await;
            return;
        };

        if session.worker_id != self.worker_id {
            let _ = self.queue.extend_visibility(&message.receipt, backoff::RELEASE_IMMEDIATELY).await;
            return;
        }

        let reason = crate::session::model::TerminationReason::DeleteAction;
        let exit_code = match self.supervisor.terminate(&session, &self.config, reason).await {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "delete-action termination reported an error; port released anyway");
                None
            }
        };
        self.ports.release(session.debug_port, &self.worker_id);
        self.sessions.finish_termination(session_id, reason, exit_code).await;
        let _ = self.queue.delete(&message.receipt).await;
    }

    /// §4.5 steps 5-8.
    async fn handle_launch(&self, message: QueueMessage, request: SessionRequest) {
        let port = match self.ports.reserve(&self.worker_id) {
            Ok(port) => port,
            Err(WorkerError::NoPortsAvailable) => {
                let _ = self.queue.extend_visibility(&message.receipt, backoff::NO_SLOTS).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "unexpected error reserving port");
                let _ = self.queue.extend_visibility(&message.receipt, backoff::UNEXPECTED_ERROR).await;
                return;
            }
        };

        self.pending_launches.fetch_add(1, Ordering::Relaxed);
        let outcome = self.launch_and_activate(port, &request).await;
        self.pending_launches.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            LaunchResult::Launched => {
                let _ = self.queue.delete(&message.receipt).await;
            }
            LaunchResult::CallbackFailed => {
                let _ = self.queue.extend_visibility(&message.receipt, backoff::CALLBACK_FAILED).await;
            }
            LaunchResult::LaunchFailed => {
                self.ports.release(port, &self.worker_id);
                self.publish_failure(&request, "launch_failed").await;
                let _ = self.queue.extend_visibility(&message.receipt, backoff::LAUNCH_FAILED).await;
            }
        }
    }

    /// Publish a `SessionResponse` to the response queue endpoint (§6). A
    /// no-op in local-filesystem mode, which has no response-queue
    /// counterpart. Best-effort: failures are logged, never propagated.
    async fn publish_to_response_queue(&self, payload: &SessionResponse) {
        if self.config.queue_mode() == QueueMode::LocalFilesystem {
            return;
        }
        let result = self
            .http
            .post(&self.config.queue_response_url)
            .json(payload)
            .timeout(Duration::from_secs(self.config.callback_timeout_sec))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            tracing::warn!(error = %e, request_id = %payload.request_id, "response-queue publish failed");
        }
    }

    /// Build and publish the §6 `status:"failed"` payload for a
    /// post-admission failure (port reserved but launch never completed),
    /// both to the response queue and, if enabled, the callback webhook.
    async fn publish_failure(&self, request: &SessionRequest, error_kind: &str) {
        let payload = SessionResponse::failed(&request.id, &self.worker_id, error_kind);
        self.publish_to_response_queue(&payload).await;

        if self.config.callback_enabled {
            if let Some(callback_url) = &self.config.callback_url {
                let timeout = Duration::from_secs(self.config.callback_timeout_sec);
                if let Err(e) = callback::deliver(&self.http, callback_url, timeout, &payload).await {
                    tracing::warn!(error = %e, request_id = %request.id, "failure callback delivery failed");
                }
            }
        }
    }

    async fn launch_and_activate(&self, port: u16, request: &SessionRequest) -> LaunchResult {
        let session_id = request.session_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let (profile_dir, profile_is_reused) = self.select_profile(port, &session_id);
        let chrome_args = request.chrome_args.clone().unwrap_or_default();

        if let Err(e) = tokio::fs::create_dir_all(&profile_dir).await {
            tracing::warn!(error = %e, "failed to create profile directory");
            return LaunchResult::LaunchFailed;
        }

        let launch = self.supervisor.launch(&self.config, port, &profile_dir, &chrome_args).await;
        let launch = match launch {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "chrome launch failed");
                return LaunchResult::LaunchFailed;
            }
        };

        if let Err(e) = self.ports.activate(port, &self.worker_id) {
            tracing::warn!(error = %e, "port activation failed after successful launch");
            return LaunchResult::LaunchFailed;
        }

        let now = chrono::Utc::now();
        let ttl_min = self.config.clamp_ttl_minutes(request.ttl_minutes);
        let session = BrowserSession {
            worker_id: self.worker_id.clone(),
            session_id: session_id.clone(),
            debug_port: port,
            process_id: launch.process_id,
            process_create_time: launch.process_create_time,
            profile_path: profile_dir,
            profile_is_reused,
            websocket_url: launch.websocket_url.clone(),
            debug_url: launch.debug_url.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(ttl_min as i64),
            hard_expires_at: now + self.config.hard_ttl(),
            last_active_at: now,
            state: SessionState::Active,
            ever_navigated: false,
            idle_since: None,
        };
        self.sessions.insert(session).await;

        let payload = SessionResponse::launched(
            &request.id,
            &session_id,
            &self.worker_id,
            &launch.debug_url,
            &launch.websocket_url,
            now,
            now + chrono::Duration::minutes(ttl_min as i64),
        );
        self.publish_to_response_queue(&payload).await;

        if self.config.callback_enabled {
            let Some(callback_url) = &self.config.callback_url else {
                tracing::warn!("callback_enabled is true but callback_url is unset");
                return LaunchResult::CallbackFailed;
            };
            let timeout = Duration::from_secs(self.config.callback_timeout_sec);
            if let Err(e) = callback::deliver(&self.http, callback_url, timeout, &payload).await {
                tracing::warn!(error = %e, "callback delivery failed; session retained, message redelivers");
                return LaunchResult::CallbackFailed;
            }
        }

        LaunchResult::Launched
    }

    /// Pick the profile directory for a new session. When reuse is enabled
    /// and a prior `p{port}` directory exists, reuse it; otherwise allocate
    /// a fresh per-session directory so a reuse-disabled launch never
    /// inherits a previous session's cookies/state on disk (§4.5 step 6).
    fn select_profile(&self, port: u16, session_id: &str) -> (PathBuf, bool) {
        if self.config.profile_reuse_enabled {
            let dir = profile::profile_dir_for_port(&self.config.profile_root, port);
            if dir.exists() {
                return (dir, true);
            }
            return (dir, false);
        }
        (profile::profile_dir_for_session(&self.config.profile_root, port, session_id), false)
    }
}

enum LaunchResult {
    Launched,
    CallbackFailed,
    LaunchFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::default_profile_root;
    use crate::queue::LocalQueueClient;

    fn fixture_dispatcher(queue_request_url: &str, queue_response_url: &str) -> Dispatcher {
        let config = Arc::new(WorkerConfig {
            queue_request_url: queue_request_url.to_string(),
            queue_response_url: queue_response_url.to_string(),
            max_sessions: 2,
            port_start: 19222,
            port_end: 19223,
            default_ttl_min: 30,
            hard_ttl_min: 120,
            idle_timeout_sec: 90,
            devtools_wait_ms: 500,
            use_custom_launcher: false,
            launcher_cmd: None,
            chrome_path: None,
            profile_reuse_enabled: false,
            profile_root: default_profile_root(),
            profile_max_age_hours: 24,
            profile_cleanup_interval_sec: 3600,
            callback_enabled: false,
            callback_url: None,
            callback_timeout_sec: 1,
            log_level: "info".to_string(),
            log_path: None,
            status_log_interval_sec: 60,
            cleanup_port_cmd: None,
            cleanup_session_cmd: None,
            cleanup_profiles_cmd: None,
        });
        let ports = Arc::new(PortRegistry::new(config.port_start, config.port_end));
        Dispatcher::new(
            "w-test".to_string(),
            Arc::clone(&config),
            ports,
            Arc::new(SessionManager::new()),
            Arc::new(ChromeSupervisor::new()),
            Arc::new(LocalQueueClient::new(std::env::temp_dir())),
        )
    }

    #[tokio::test]
    async fn publish_to_response_queue_is_a_no_op_in_local_mode() {
        let dispatcher = fixture_dispatcher("local", "http://127.0.0.1:1/nope");
        let payload = SessionResponse::launched(
            "req-1",
            "s-1",
            "w-test",
            "http://127.0.0.1:9222/json",
            "ws://127.0.0.1:9222/devtools/browser/x",
            chrono::Utc::now(),
            chrono::Utc::now(),
        );
        // Would hang/err against an unreachable remote if not skipped; local
        // mode has no response-queue counterpart (§6).
        dispatcher.publish_to_response_queue(&payload).await;
    }

    #[tokio::test]
    async fn publish_failure_builds_a_failed_status_payload() {
        let dispatcher = fixture_dispatcher("local", "local");
        let request = SessionRequest::parse(r#"{"id":"req-1"}"#).unwrap();
        dispatcher.publish_failure(&request, "launch_failed").await;
    }
}
