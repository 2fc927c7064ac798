//! Session Manager (§4.4): owns the live session map and runs the
//! periodic sweep that terminates expired, hard-expired, unhealthy, and
//! never-used sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::WorkerConfig;
use crate::process::{ChromeSupervisor, PortRegistry};
use crate::session::model::{BrowserSession, HealthStatus, SessionState, TerminatedRecord, TerminationReason};

/// Global wall-clock budget for one sweep pass (§4.4 step 3).
const SWEEP_BUDGET: Duration = Duration::from_secs(120);
/// Bounded terminated-session history kept for diagnostics (§3).
const HISTORY_CAPACITY: usize = 256;
/// A session is tolerated through one sweep cycle of transient unhealth
/// before being reclassified (§7, back-pressure table).
const TRANSIENT_TOLERANCE: u32 = 1;

struct Inner {
    sessions: HashMap<String, BrowserSession>,
    transient_strikes: HashMap<String, u32>,
    history: std::collections::VecDeque<TerminatedRecord>,
}

/// Owns all live `BrowserSession` state. The Chrome Supervisor never holds
/// session state itself; it only receives session values as call arguments.
pub struct SessionManager {
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                transient_strikes: HashMap::new(),
                history: std::collections::VecDeque::with_capacity(HISTORY_CAPACITY),
            }),
        }
    }

    pub async fn insert(&self, session: BrowserSession) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session.session_id.clone(), session);
    }

    pub async fn lookup(&self, session_id: &str) -> Option<BrowserSession> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<BrowserSession> {
        let mut inner = self.inner.lock().await;
        inner.transient_strikes.remove(session_id);
        inner.sessions.remove(session_id)
    }

    pub async fn list_ids(&self) -> Vec<String> {
        self.inner.lock().await.sessions.keys().cloned().collect()
    }

    pub async fn count_active(&self) -> usize {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active || s.state == SessionState::Launching)
            .count()
    }

    pub async fn history(&self) -> Vec<TerminatedRecord> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    fn record_history(inner: &mut Inner, record: TerminatedRecord) {
        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    /// Remove a session and append its terminated-history record. Shared
    /// by every termination path (sweep, delete-action, shutdown) so the
    /// history ring reflects every teardown, not just sweep-driven ones
    /// (§4.3.3 step 6).
    pub async fn finish_termination(&self, session_id: &str, reason: TerminationReason, exit_code: Option<i32>) {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(session_id);
        inner.transient_strikes.remove(session_id);
        Self::record_history(
            &mut inner,
            TerminatedRecord {
                session_id: session_id.to_string(),
                reason,
                terminated_at: Utc::now(),
                exit_code,
            },
        );
    }

    /// Write a health observation back onto the *stored* session (not a
    /// `lookup()` clone), so activity tracking actually persists across
    /// sweep ticks. Returns the idle duration in seconds since the
    /// session last left blank, when still never-navigated and idle.
    async fn record_health_observation(&self, session_id: &str, health: HealthStatus, now: chrono::DateTime<Utc>) -> Option<i64> {
        let mut inner = self.inner.lock().await;
        let session = inner.sessions.get_mut(session_id)?;
        match health {
            HealthStatus::Active => {
                session.ever_navigated = true;
                session.last_active_at = now;
                session.idle_since = None;
                None
            }
            HealthStatus::Idle => {
                let idle_since = *session.idle_since.get_or_insert(now);
                if session.ever_navigated {
                    None
                } else {
                    Some(now.signed_duration_since(idle_since).num_seconds())
                }
            }
            _ => None,
        }
    }

    /// Run one sweep pass: decide a termination reason for each live
    /// session in priority order, terminate with a bounded global budget,
    /// and release the corresponding port (§4.4).
    pub async fn sweep(&self, config: &WorkerConfig, supervisor: &ChromeSupervisor, ports: &PortRegistry) {
        let ids = self.list_ids().await;
        let deadline = Instant::now() + SWEEP_BUDGET;

        for session_id in ids {
            if Instant::now() >= deadline {
                tracing::warn!("sweep budget exhausted; remaining sessions deferred to next tick");
                break;
            }

            let Some(session) = self.lookup(&session_id).await else { continue };
            if session.state != SessionState::Active && session.state != SessionState::Launching {
                continue;
            }

            let decision = self.decide(config, supervisor, &session).await;
            let Some(reason) = decision else { continue };

            self.mark_terminating(&session_id).await;
            let exit_code = match tokio::time::timeout(
                crate::process::supervisor::TERMINATE_TIMEOUT,
                supervisor.terminate(&session, config, reason),
            )
            .await
            {
                Ok(Ok(code)) => code,
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "termination reported an error; port released anyway");
                    None
                }
                Err(_) => {
                    tracing::warn!(session_id = %session_id, "termination timed out; escalating");
                    None
                }
            };

            ports.release(session.debug_port, &session_id);
            self.finish_termination(&session_id, reason, exit_code).await;

            tracing::info!(session_id = %session_id, reason = reason.as_str(), "session terminated by sweep");
        }
    }

    async fn mark_terminating(&self, session_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.state = SessionState::Terminating;
        }
    }

    /// Priority-ordered decision per session (§4.4 step 2).
    async fn decide(&self, config: &WorkerConfig, supervisor: &ChromeSupervisor, session: &BrowserSession) -> Option<TerminationReason> {
        let now = Utc::now();
        if session.is_hard_expired(now) {
            return Some(TerminationReason::HardTtlExceeded);
        }
        if session.is_expired(now) {
            return Some(TerminationReason::Expired);
        }

        let health = supervisor.health_check(session).await;
        match health {
            HealthStatus::Crashed => return Some(TerminationReason::Crashed),
            HealthStatus::Closed => return Some(TerminationReason::Closed),
            HealthStatus::UnhealthyTransient => {
                let mut inner = self.inner.lock().await;
                let strikes = inner.transient_strikes.entry(session.session_id.clone()).or_insert(0);
                *strikes += 1;
                if *strikes > TRANSIENT_TOLERANCE {
                    return Some(TerminationReason::Crashed);
                }
                return None;
            }
            HealthStatus::Active | HealthStatus::Idle => {
                let mut inner = self.inner.lock().await;
                inner.transient_strikes.remove(&session.session_id);
            }
        }

        let never_used_idle_secs = self.record_health_observation(&session.session_id, health, now).await;
        if let Some(idle_secs) = never_used_idle_secs {
            if idle_secs as u64 > config.idle_timeout_sec {
                return Some(TerminationReason::NeverUsed);
            }
        }

        None
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedSessionManager = Arc<SessionManager>;
