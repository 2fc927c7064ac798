//! Chrome command-line construction and process spawning (§4.3.1).
//!
//! Two launch strategies are supported: direct spawn of a located Chrome
//! binary, and delegation to an external "custom launcher" script that is
//! expected to print the spawned PID on stdout.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{Result, WorkerError};

/// Flags that would let a request escape the session boundary: change the
/// debugging interface, relocate the profile, widen devtools access, or
/// disable sandboxing beyond the platform default. Denied flags are
/// dropped with a warning rather than failing the launch (§4.3.1).
const ARG_DENYLIST_PREFIXES: &[&str] = &[
    "--remote-debugging-port",
    "--remote-debugging-address",
    "--user-data-dir",
    "--remote-allow-origins",
    "--disable-web-security",
    "--no-sandbox",
    "--disable-setuid-sandbox",
];

/// Base flags always present regardless of the request (§4.3.1).
fn base_args(port: u16, profile_dir: &Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--proxy-bypass-list=<-loopback>".to_string(),
    ]
}

/// Filter request-supplied `chrome_args` through the denylist. Returns the
/// accepted args and the rejected ones (for a warning log at the call site).
pub fn filter_chrome_args(requested: &[String]) -> (Vec<String>, Vec<String>) {
    let mut accepted = Vec::with_capacity(requested.len());
    let mut rejected = Vec::new();
    for arg in requested {
        let denied = ARG_DENYLIST_PREFIXES
            .iter()
            .any(|prefix| arg == *prefix || arg.starts_with(&format!("{prefix}=")));
        if denied {
            rejected.push(arg.clone());
        } else {
            accepted.push(arg.clone());
        }
    }
    (accepted, rejected)
}

/// Build the full Chrome argument list for a launch.
pub fn build_args(port: u16, profile_dir: &Path, requested_chrome_args: &[String]) -> (Vec<String>, Vec<String>) {
    let mut args = base_args(port, profile_dir);
    let (accepted, rejected) = filter_chrome_args(requested_chrome_args);
    args.extend(accepted);
    (args, rejected)
}

/// Locate a Chrome/Chromium executable: the configured path if set and
/// valid, otherwise the first match on a platform search list via `which`.
pub fn find_chrome_binary(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        crate::config::validate_chrome_path(path)?;
        return Ok(path.to_path_buf());
    }

    for candidate in search_candidates() {
        if let Ok(found) = which::which(candidate) {
            return Ok(found);
        }
    }

    Err(WorkerError::LaunchFailed(
        "no chrome executable found on search path".to_string(),
    ))
}

fn search_candidates() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["chrome.exe", "chrome", "msedge.exe"]
    } else if cfg!(target_os = "macos") {
        &["google-chrome", "chromium", "chrome"]
    } else {
        &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
    }
}

/// Direct-mode launch: spawn Chrome detached and return its PID.
pub fn spawn_direct(chrome_path: &Path, args: &[String]) -> Result<u32> {
    let mut cmd = Command::new(chrome_path);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| WorkerError::LaunchFailed(format!("failed to spawn chrome: {e}")))?;
    Ok(child.id())
}

/// Custom-launcher mode: delegate spawning (plus host port-forwarding and
/// firewall setup) to an external command, which must print the Chrome PID
/// on stdout (§4.3.1, §6).
pub fn spawn_via_launcher(launcher_cmd: &str, port: u16, listen_ip: &str) -> Result<Option<u32>> {
    let output = Command::new(launcher_cmd)
        .arg(port.to_string())
        .arg(listen_ip)
        .output()
        .map_err(|e| WorkerError::LaunchFailed(format!("launcher command failed to run: {e}")))?;

    if !output.status.success() {
        return Err(WorkerError::LaunchFailed(format!(
            "launcher exited with {:?}",
            output.status.code()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let pid = stdout.trim().parse::<u32>().ok();
    Ok(pid)
}

/// Fallback for custom-launcher mode when the launcher prints nothing: scan
/// for whichever process is listening on `port` within `timeout` (§4.3.1).
pub fn find_pid_listening_on_port(port: u16, timeout: Duration, system: &mut sysinfo::System) -> Option<u32> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        system.refresh_all();
        if let Some(pid) = pid_bound_to_port(port) {
            return Some(pid);
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}

/// Best-effort: a port is "owned" once nothing can bind to it anymore.
/// Actual PID-to-socket mapping is platform-specific (netstat/procfs on
/// Windows and Linux); we treat "no longer bindable" as the readiness
/// signal and let the DevTools probe (§4.3.1) confirm the real owner.
fn pid_bound_to_port(port: u16) -> Option<u32> {
    use std::net::TcpListener;
    if TcpListener::bind(("0.0.0.0", port)).is_ok() {
        None
    } else {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn filter_chrome_args_drops_dangerous_flags() {
        let requested = vec![
            "--window-size=1920,1080".to_string(),
            "--remote-debugging-port=1234".to_string(),
            "--user-data-dir=/tmp/evil".to_string(),
            "--disable-web-security".to_string(),
            "--lang=en-US".to_string(),
        ];
        let (accepted, rejected) = filter_chrome_args(&requested);
        assert_eq!(
            accepted,
            vec!["--window-size=1920,1080".to_string(), "--lang=en-US".to_string()]
        );
        assert_eq!(rejected.len(), 3);
    }

    #[test]
    fn build_args_always_includes_base_flags() {
        let (args, rejected) = build_args(9222, &PathBuf::from("/tmp/profile"), &[]);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
        assert!(rejected.is_empty());
    }

    #[test]
    fn request_cannot_override_debug_port() {
        let requested = vec!["--remote-debugging-port=9999".to_string()];
        let (args, rejected) = build_args(9222, &PathBuf::from("/tmp/profile"), &requested);
        assert_eq!(rejected, requested);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(!args.contains(&"--remote-debugging-port=9999".to_string()));
    }
}
