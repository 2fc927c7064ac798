use std::path::PathBuf;
use std::time::Duration;

/// Frozen configuration snapshot loaded once at startup from the process
/// environment (§4.1). No dynamic reconfiguration: every component that
/// needs a setting is constructed with a reference to this value, never
/// with implicit environment reads of its own.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue endpoints. `queue_request_url == "local"` selects filesystem
    /// mode (§6) regardless of `queue_response_url`.
    pub queue_request_url: String,
    pub queue_response_url: String,

    /// Admission ceiling: `count(LAUNCHING ∪ ACTIVE) <= max_sessions`.
    pub max_sessions: usize,

    /// Inclusive port range scanned by the Port Registry.
    pub port_start: u16,
    pub port_end: u16,

    pub default_ttl_min: u64,
    pub hard_ttl_min: u64,
    pub idle_timeout_sec: u64,
    pub devtools_wait_ms: u64,

    pub use_custom_launcher: bool,
    pub launcher_cmd: Option<String>,
    pub chrome_path: Option<PathBuf>,

    pub profile_reuse_enabled: bool,
    pub profile_root: PathBuf,
    pub profile_max_age_hours: u64,
    pub profile_cleanup_interval_sec: u64,

    pub callback_enabled: bool,
    pub callback_url: Option<String>,
    pub callback_timeout_sec: u64,

    pub log_level: String,
    pub log_path: Option<PathBuf>,
    pub status_log_interval_sec: u64,

    /// Helper commands invoked as opaque external processes (§6).
    pub cleanup_port_cmd: Option<String>,
    pub cleanup_session_cmd: Option<String>,
    pub cleanup_profiles_cmd: Option<String>,
}

impl WorkerConfig {
    pub fn queue_mode(&self) -> QueueMode {
        if self.queue_request_url == "local" {
            QueueMode::LocalFilesystem
        } else {
            QueueMode::Remote
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_min * 60)
    }

    pub fn hard_ttl(&self) -> Duration {
        Duration::from_secs(self.hard_ttl_min * 60)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn devtools_wait(&self) -> Duration {
        Duration::from_millis(self.devtools_wait_ms)
    }

    /// Clamp a requested TTL (minutes) to the hard ceiling, per §3.
    pub fn clamp_ttl_minutes(&self, requested: Option<u64>) -> u64 {
        let wanted = requested.unwrap_or(self.default_ttl_min);
        wanted.min(self.hard_ttl_min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Remote,
    LocalFilesystem,
}

pub(crate) fn default_profile_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chrome_session_worker")
        .join("profiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> WorkerConfig {
        WorkerConfig {
            queue_request_url: "https://queue.example/requests".to_string(),
            queue_response_url: "https://queue.example/responses".to_string(),
            max_sessions: 5,
            port_start: 9222,
            port_end: 9321,
            default_ttl_min: 30,
            hard_ttl_min: 120,
            idle_timeout_sec: 90,
            devtools_wait_ms: 90_000,
            use_custom_launcher: false,
            launcher_cmd: None,
            chrome_path: None,
            profile_reuse_enabled: false,
            profile_root: default_profile_root(),
            profile_max_age_hours: 24,
            profile_cleanup_interval_sec: 3600,
            callback_enabled: false,
            callback_url: None,
            callback_timeout_sec: 10,
            log_level: "info".to_string(),
            log_path: None,
            status_log_interval_sec: 60,
            cleanup_port_cmd: None,
            cleanup_session_cmd: None,
            cleanup_profiles_cmd: None,
        }
    }

    #[test]
    fn queue_mode_selects_local_on_sentinel() {
        let mut cfg = base_config();
        cfg.queue_request_url = "local".to_string();
        assert_eq!(cfg.queue_mode(), QueueMode::LocalFilesystem);

        let cfg = base_config();
        assert_eq!(cfg.queue_mode(), QueueMode::Remote);
    }

    #[test]
    fn clamp_ttl_minutes_caps_at_hard_ttl() {
        let cfg = base_config();
        assert_eq!(cfg.clamp_ttl_minutes(Some(10)), 10);
        assert_eq!(cfg.clamp_ttl_minutes(Some(500)), 120);
        assert_eq!(cfg.clamp_ttl_minutes(None), 30);
    }
}
