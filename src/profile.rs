//! Profile Janitor (§4.6): periodic scan of the profile root deleting
//! stale per-port directories not referenced by any live session.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::session::SessionManager;

/// Directory naming scheme for a port's *reusable* profile (§4.5 step 6).
pub fn profile_dir_for_port(profile_root: &Path, port: u16) -> PathBuf {
    profile_root.join(format!("p{port}"))
}

/// Directory naming scheme for a fresh, non-reused per-session profile
/// (§4.5 step 6, §9 open question 4): keyed by port and session id so a
/// new session never reuses a prior session's on-disk state when reuse
/// is disabled.
pub fn profile_dir_for_session(profile_root: &Path, port: u16, session_id: &str) -> PathBuf {
    profile_root.join(format!("p{port}-{session_id}"))
}

/// One janitor pass: delete subdirectories of `profile_root` matching the
/// `p{port}` naming scheme whose mtime is older than `max_age`, unless a
/// live session currently references that directory. Best-effort; a
/// locked directory is skipped silently and retried next interval.
pub async fn sweep_once(profile_root: &Path, max_age: Duration, sessions: &Arc<SessionManager>, cleanup_profiles_cmd: Option<&str>) {
    let live_paths: std::collections::HashSet<PathBuf> = {
        let mut paths = std::collections::HashSet::new();
        for id in sessions.list_ids().await {
            if let Some(session) = sessions.lookup(&id).await {
                paths.insert(session.profile_path);
            }
        }
        paths
    };

    let mut entries = match tokio::fs::read_dir(profile_root).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error = %e, "profile janitor: profile root unreadable this tick");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "profile janitor: error walking profile root");
                break;
            }
        };

        let path = entry.path();
        if !is_managed_profile_dir(&path) {
            continue;
        }
        if live_paths.contains(&path) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(_) => continue,
        };
        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = match SystemTime::now().duration_since(modified) {
            Ok(age) => age,
            Err(_) => continue,
        };
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => tracing::info!(path = %path.display(), "profile janitor: removed stale profile"),
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "profile janitor: directory busy, retrying next tick"),
        }
    }

    if let Some(cmd) = cleanup_profiles_cmd {
        let max_age_hours = max_age.as_secs() / 3600;
        if let Err(e) = run_profiles_cleanup_hook(cmd, profile_root, max_age_hours) {
            tracing::warn!(error = %e, "profile-scan cleanup hook failed");
        }
    }
}

/// Best-effort invocation of an external profile-scan cleanup command:
/// `<cmd> <profile_root> <max_age_hours>` (§6).
fn run_profiles_cleanup_hook(cmd: &str, profile_root: &Path, max_age_hours: u64) -> std::io::Result<()> {
    let status = std::process::Command::new(cmd)
        .arg(profile_root)
        .arg(max_age_hours.to_string())
        .status()?;
    if !status.success() {
        tracing::warn!(code = ?status.code(), "profile-scan cleanup hook exited non-zero");
    }
    Ok(())
}

/// Recognizes both the reusable `p{port}` scheme and the fresh
/// `p{port}-{session_id}` scheme as belonging to this worker.
fn is_managed_profile_dir(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).map(is_managed_profile_name).unwrap_or(false)
}

fn is_managed_profile_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('p') else {
        return false;
    };
    match rest.split_once('-') {
        Some((port, _session_id)) => port.parse::<u16>().is_ok(),
        None => rest.parse::<u16>().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dir_uses_p_prefix_naming() {
        let root = PathBuf::from("/tmp/profiles");
        let dir = profile_dir_for_port(&root, 9222);
        assert_eq!(dir, PathBuf::from("/tmp/profiles/p9222"));
    }

    #[test]
    fn recognizes_managed_profile_directories() {
        assert!(is_managed_profile_dir(Path::new("/tmp/profiles/p9222")));
        assert!(!is_managed_profile_dir(Path::new("/tmp/profiles/other")));
        assert!(!is_managed_profile_dir(Path::new("/tmp/profiles/profile-x")));
    }

    #[test]
    fn recognizes_fresh_per_session_profile_directories() {
        assert!(is_managed_profile_dir(Path::new("/tmp/profiles/p9222-s-abc")));
        assert!(!is_managed_profile_dir(Path::new("/tmp/profiles/px-s-abc")));
    }

    #[test]
    fn profile_dir_for_session_is_unique_per_session() {
        let root = PathBuf::from("/tmp/profiles");
        let a = profile_dir_for_session(&root, 9222, "s-a");
        let b = profile_dir_for_session(&root, 9222, "s-b");
        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("/tmp/profiles/p9222-s-a"));
    }

    #[tokio::test]
    async fn sweep_removes_stale_unreferenced_profile_dir() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("p9222");
        tokio::fs::create_dir(&stale).await.unwrap();

        let sessions = Arc::new(SessionManager::new());
        sweep_once(root.path(), Duration::from_secs(0), &sessions, None).await;

        assert!(tokio::fs::metadata(&stale).await.is_err());
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_directories_alone() {
        let root = tempfile::tempdir().unwrap();
        let fresh = root.path().join("p9223");
        tokio::fs::create_dir(&fresh).await.unwrap();

        let sessions = Arc::new(SessionManager::new());
        sweep_once(root.path(), Duration::from_secs(3600), &sessions, None).await;

        assert!(tokio::fs::metadata(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_invokes_configured_profiles_cleanup_hook() {
        let root = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionManager::new());
        sweep_once(root.path(), Duration::from_secs(3600), &sessions, Some("true")).await;
    }
}
