//! Chrome Supervisor (§4.3): stateless launch/health/terminate operations.
//! Holds no session state of its own — every call takes or returns a
//! `BrowserSession` value owned by the Session Manager.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, System};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::process::{devtools, launcher};
use crate::session::model::{BrowserSession, HealthStatus, TerminationReason};

/// Per-session timeout for termination, including the process-tree kill
/// and port/profile teardown (§3).
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LaunchOutcome {
    pub process_id: u32,
    pub process_create_time: u64,
    pub websocket_url: String,
    pub debug_url: String,
}

pub struct ChromeSupervisor {
    http: reqwest::Client,
    system: Mutex<System>,
}

impl ChromeSupervisor {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            system: Mutex::new(System::new_all()),
        }
    }

    /// Launch Chrome on `port` with the given profile dir and requested
    /// args, wait for DevTools readiness, and return launch metadata
    /// (§4.3.1).
    pub async fn launch(
        &self,
        config: &WorkerConfig,
        port: u16,
        profile_dir: &PathBuf,
        requested_chrome_args: &[String],
    ) -> Result<LaunchOutcome> {
        let (args, rejected) = launcher::build_args(port, profile_dir, requested_chrome_args);
        if !rejected.is_empty() {
            tracing::warn!(?rejected, "dropped disallowed chrome args from request");
        }

        let pid = if config.use_custom_launcher {
            let launcher_cmd = config
                .launcher_cmd
                .as_deref()
                .ok_or_else(|| WorkerError::LaunchFailed("launcher_cmd missing despite use_custom_launcher".to_string()))?;
            match launcher::spawn_via_launcher(launcher_cmd, port, "127.0.0.1")? {
                Some(pid) => pid,
                None => {
                    let mut system = self.system.lock();
                    launcher::find_pid_listening_on_port(port, Duration::from_secs(8), &mut system)
                        .ok_or_else(|| WorkerError::LaunchFailed("custom launcher produced no PID".to_string()))?
                }
            }
        } else {
            let chrome_path = launcher::find_chrome_binary(config.chrome_path.as_deref())?;
            launcher::spawn_direct(&chrome_path, &args)?
        };

        let process_create_time = self.read_create_time(pid).unwrap_or_else(now_unix);

        let version = devtools::wait_for_ready(&self.http, port, config.devtools_wait()).await?;

        Ok(LaunchOutcome {
            process_id: pid,
            process_create_time,
            websocket_url: version.websocket_url,
            debug_url: format!("http://127.0.0.1:{port}/json"),
        })
    }

    /// Run one DevTools health check against a live session (§4.3.2).
    pub async fn health_check(&self, session: &BrowserSession) -> HealthStatus {
        devtools::check_health(&self.http, session.debug_port).await
    }

    /// Tear down a session: verify PID identity, kill the process tree,
    /// run the best-effort host cleanup hook, and report whether the
    /// process was actually found alive (§4.3.3).
    pub async fn terminate(&self, session: &BrowserSession, config: &WorkerConfig, reason: TerminationReason) -> Result<Option<i32>> {
        tracing::info!(
            session_id = %session.session_id,
            port = session.debug_port,
            reason = reason.as_str(),
            "terminating session"
        );

        let exit_code = self.kill_process_tree(session.process_id, session.process_create_time);

        if let Some(cmd) = &config.cleanup_port_cmd {
            if let Err(e) = run_cleanup_hook(cmd, session.debug_port) {
                tracing::warn!(error = %e, port = session.debug_port, "port cleanup hook failed");
            }
        }

        if let Some(cmd) = &config.cleanup_session_cmd {
            if let Err(e) = run_session_cleanup_hook(cmd, session.process_id, session.debug_port, &session.profile_path) {
                tracing::warn!(error = %e, session_id = %session.session_id, "session cleanup hook failed");
            }
        }

        if !session.profile_is_reused {
            schedule_profile_deletion(session.profile_path.clone());
        }

        Ok(exit_code)
    }

    /// Kill `pid` and its children, but only if `pid`'s current start time
    /// still matches `expected_create_time` — otherwise the PID has been
    /// reused by an unrelated process and must not be touched (§4.3.3).
    fn kill_process_tree(&self, pid: u32, expected_create_time: u64) -> Option<i32> {
        let mut system = self.system.lock();
        system.refresh_all();

        let target = Pid::from_u32(pid);
        let process = system.process(target)?;
        if process.start_time() != expected_create_time {
            tracing::warn!(pid, "skipping kill: pid was reused by a different process");
            return None;
        }

        let children: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(target))
            .map(|(child_pid, _)| *child_pid)
            .collect();

        for child in children {
            if let Some(p) = system.process(child) {
                p.kill();
            }
        }

        // sysinfo exposes no portable exit-code retrieval; a kill() success
        // just means the signal was delivered. The caller only needs to
        // know the tree was reaped, not the code.
        system.process(target).map(|p| p.kill()).unwrap_or(false);
        None
    }

    fn read_create_time(&self, pid: u32) -> Option<u64> {
        let mut system = self.system.lock();
        let target = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[target]),
            ProcessRefreshKind::new(),
        );
        system.process(target).map(|p| p.start_time())
    }
}

impl Default for ChromeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// Delete a non-reused session's profile directory without blocking
/// termination on it (§4.3.3 step 5: "Supervisor does not block on it").
fn schedule_profile_deletion(path: PathBuf) {
    tokio::spawn(async move {
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "removed non-reused profile directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "failed to remove non-reused profile directory"),
        }
    });
}

/// Best-effort invocation of an external cleanup command (e.g. closing a
/// host-level port forward or firewall rule opened for this session)
/// (§4.3.1, §6). Failures are logged, never propagated.
fn run_cleanup_hook(cmd: &str, port: u16) -> Result<()> {
    let status = std::process::Command::new(cmd)
        .arg(port.to_string())
        .status()
        .map_err(WorkerError::Io)?;
    if !status.success() {
        tracing::warn!(port, code = ?status.code(), "cleanup hook exited non-zero");
    }
    Ok(())
}

/// Best-effort session force-cleanup hook: `<cmd> <pid> <port> [<profile_dir>]` (§6).
fn run_session_cleanup_hook(cmd: &str, pid: u32, port: u16, profile_dir: &PathBuf) -> Result<()> {
    let status = std::process::Command::new(cmd)
        .arg(pid.to_string())
        .arg(port.to_string())
        .arg(profile_dir)
        .status()
        .map_err(WorkerError::Io)?;
    if !status.success() {
        tracing::warn!(pid, port, code = ?status.code(), "session cleanup hook exited non-zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_hook_runs_and_reports_success() {
        run_cleanup_hook("true", 9222).unwrap();
    }

    #[test]
    fn cleanup_hook_surfaces_io_error_for_missing_binary() {
        let err = run_cleanup_hook("definitely-not-a-real-binary-xyz", 9222);
        assert!(err.is_err());
    }

    #[test]
    fn session_cleanup_hook_runs_with_pid_port_and_profile_args() {
        run_session_cleanup_hook("true", 4242, 9222, &PathBuf::from("/tmp/profiles/p9222")).unwrap();
    }

    #[tokio::test]
    async fn schedule_profile_deletion_removes_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("p9222-s1");
        tokio::fs::create_dir(&profile).await.unwrap();

        schedule_profile_deletion(profile.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(tokio::fs::metadata(&profile).await.is_err());
    }
}
