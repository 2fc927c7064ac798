//! Loads `WorkerConfig` from the process environment (§4.1). No config
//! file, no CLI flags: every recognized `CSW_*` variable is read exactly
//! once at startup.

use crate::config::schema::{default_profile_root, WorkerConfig};
use crate::error::{Result, WorkerError};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Thin wrapper so tests can load from a constructed map instead of the
/// real process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Load configuration from the real process environment.
pub fn load_config() -> Result<WorkerConfig> {
    load_from(&ProcessEnv)
}

/// Load configuration from an arbitrary [`EnvSource`]; used by `load_config`
/// and directly by tests that want to avoid mutating real env vars.
pub fn load_from(env: &dyn EnvSource) -> Result<WorkerConfig> {
    let queue_request_url = env
        .get("CSW_QUEUE_REQUEST_URL")
        .ok_or_else(|| WorkerError::Config("CSW_QUEUE_REQUEST_URL is required".to_string()))?;
    let queue_response_url = env
        .get("CSW_QUEUE_RESPONSE_URL")
        .unwrap_or_else(|| queue_request_url.clone());

    let max_sessions = parse_opt(env, "CSW_MAX_SESSIONS", 5)?;
    let port_start = parse_opt(env, "CSW_PORT_START", 9222u16)?;
    let port_end = parse_opt(env, "CSW_PORT_END", port_start.saturating_add(99))?;
    if port_end < port_start {
        return Err(WorkerError::Config(format!(
            "CSW_PORT_END ({port_end}) must be >= CSW_PORT_START ({port_start})"
        )));
    }

    let default_ttl_min = parse_opt(env, "CSW_DEFAULT_TTL_MIN", 30u64)?;
    let hard_ttl_min = parse_opt(env, "CSW_HARD_TTL_MIN", 120u64)?;
    if hard_ttl_min < default_ttl_min {
        return Err(WorkerError::Config(
            "CSW_HARD_TTL_MIN must be >= CSW_DEFAULT_TTL_MIN".to_string(),
        ));
    }
    let idle_timeout_sec = parse_opt(env, "CSW_IDLE_TIMEOUT_SEC", 90u64)?;
    let devtools_wait_ms = parse_opt(env, "CSW_DEVTOOLS_WAIT_MS", 90_000u64)?;

    let use_custom_launcher = parse_opt(env, "CSW_USE_CUSTOM_LAUNCHER", false)?;
    let launcher_cmd = env.get("CSW_LAUNCHER_CMD");
    if use_custom_launcher && launcher_cmd.is_none() {
        return Err(WorkerError::Config(
            "CSW_LAUNCHER_CMD is required when CSW_USE_CUSTOM_LAUNCHER=true".to_string(),
        ));
    }
    let chrome_path = env.get("CSW_CHROME_PATH").map(PathBuf::from);

    let profile_reuse_enabled = parse_opt(env, "CSW_PROFILE_REUSE_ENABLED", false)?;
    let profile_root = env
        .get("CSW_PROFILE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(default_profile_root);
    let profile_max_age_hours = parse_opt(env, "CSW_PROFILE_MAX_AGE_HOURS", 24u64)?;
    let profile_cleanup_interval_sec = parse_opt(env, "CSW_PROFILE_CLEANUP_INTERVAL_SEC", 3600u64)?;

    let callback_enabled = parse_opt(env, "CSW_CALLBACK_ENABLED", false)?;
    let callback_url = env.get("CSW_CALLBACK_URL");
    if callback_enabled && callback_url.is_none() {
        return Err(WorkerError::Config(
            "CSW_CALLBACK_URL is required when CSW_CALLBACK_ENABLED=true".to_string(),
        ));
    }
    let callback_timeout_sec = parse_opt(env, "CSW_CALLBACK_TIMEOUT_SEC", 10u64)?;

    let log_level = env.get("CSW_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
    let log_path = env.get("CSW_LOG_PATH").map(PathBuf::from);
    let status_log_interval_sec = parse_opt(env, "CSW_STATUS_LOG_INTERVAL_SEC", 60u64)?;

    Ok(WorkerConfig {
        queue_request_url,
        queue_response_url,
        max_sessions,
        port_start,
        port_end,
        default_ttl_min,
        hard_ttl_min,
        idle_timeout_sec,
        devtools_wait_ms,
        use_custom_launcher,
        launcher_cmd,
        chrome_path,
        profile_reuse_enabled,
        profile_root,
        profile_max_age_hours,
        profile_cleanup_interval_sec,
        callback_enabled,
        callback_url,
        callback_timeout_sec,
        log_level,
        log_path,
        status_log_interval_sec,
        cleanup_port_cmd: env.get("CSW_CLEANUP_PORT_CMD"),
        cleanup_session_cmd: env.get("CSW_CLEANUP_SESSION_CMD"),
        cleanup_profiles_cmd: env.get("CSW_CLEANUP_PROFILES_CMD"),
    })
}

/// Parse an optional env var, falling back to `default` when absent. A
/// value that *is* present but fails to parse is a fatal config error
/// (§4.1: never silently substitute a default for a malformed value).
fn parse_opt<T>(env: &dyn EnvSource, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| WorkerError::Config(format!("{key}={raw:?} is invalid: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_queue_url_is_fatal() {
        let env = env_map(&[]);
        let err = load_from(&env).unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }

    #[test]
    fn defaults_fill_in_absent_values() {
        let env = env_map(&[("CSW_QUEUE_REQUEST_URL", "local")]);
        let cfg = load_from(&env).unwrap();
        assert_eq!(cfg.max_sessions, 5);
        assert_eq!(cfg.port_start, 9222);
        assert_eq!(cfg.port_end, 9321);
        assert_eq!(cfg.default_ttl_min, 30);
    }

    #[test]
    fn malformed_present_value_is_fatal_not_defaulted() {
        let env = env_map(&[
            ("CSW_QUEUE_REQUEST_URL", "local"),
            ("CSW_MAX_SESSIONS", "not-a-number"),
        ]);
        let err = load_from(&env).unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }

    #[test]
    fn custom_launcher_requires_cmd() {
        let env = env_map(&[
            ("CSW_QUEUE_REQUEST_URL", "local"),
            ("CSW_USE_CUSTOM_LAUNCHER", "true"),
        ]);
        assert!(load_from(&env).is_err());
    }

    #[test]
    fn port_end_before_start_is_rejected() {
        let env = env_map(&[
            ("CSW_QUEUE_REQUEST_URL", "local"),
            ("CSW_PORT_START", "9300"),
            ("CSW_PORT_END", "9200"),
        ]);
        assert!(load_from(&env).is_err());
    }
}
