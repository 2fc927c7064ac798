use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Lifecycle state of a live session (§3). Transitions only ever move
/// forward: `Launching -> Active -> Terminating -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launching,
    Active,
    Terminating,
    Terminated,
}

/// Why a session was torn down (§3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Expired,
    HardTtlExceeded,
    Crashed,
    Closed,
    NeverUsed,
    DeleteAction,
    LaunchFailed,
    Shutdown,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Expired => "expired",
            TerminationReason::HardTtlExceeded => "hard_ttl_exceeded",
            TerminationReason::Crashed => "crashed",
            TerminationReason::Closed => "closed",
            TerminationReason::NeverUsed => "never_used",
            TerminationReason::DeleteAction => "delete_action",
            TerminationReason::LaunchFailed => "launch_failed",
            TerminationReason::Shutdown => "shutdown",
        }
    }
}

/// Outcome of a single DevTools health check (§4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Active,
    Idle,
    UnhealthyTransient,
    Crashed,
    Closed,
}

/// A live browser session, owned exclusively by the Session Manager. The
/// Chrome Supervisor is stateless and only ever receives a session value as
/// input/output of a launch or termination call.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    pub worker_id: String,
    pub session_id: String,
    pub debug_port: u16,
    pub process_id: u32,
    /// Used for PID-reuse detection (§4.3.3): compared against the OS
    /// process's reported start time before issuing a kill.
    pub process_create_time: u64,
    pub profile_path: PathBuf,
    pub profile_is_reused: bool,
    pub websocket_url: String,
    pub debug_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hard_expires_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub state: SessionState,
    /// Set once a health check observes `Active` (a page away from blank);
    /// used to decide the `never_used` reason (§4.4). Updated in place on
    /// the stored session by the sweep's health observation, not on a
    /// `lookup()` clone.
    pub ever_navigated: bool,
    /// Wall-clock time the session first observed `idle` health since its
    /// last `Active` observation; reset to `None` whenever `Active` is
    /// observed again.
    pub idle_since: Option<DateTime<Utc>>,
}

impl BrowserSession {
    pub fn is_hard_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.hard_expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Bounded diagnostic record of a past termination (§3).
#[derive(Debug, Clone)]
pub struct TerminatedRecord {
    pub session_id: String,
    pub reason: TerminationReason,
    pub terminated_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}
