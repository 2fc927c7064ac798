use std::sync::Arc;

use chrome_session_worker::config::WorkerConfig;
use chrome_session_worker::dispatcher::Dispatcher;
use chrome_session_worker::process::{ChromeSupervisor, PortRegistry};
use chrome_session_worker::queue::{LocalQueueClient, QueueClient};
use chrome_session_worker::session::SessionManager;

fn test_config(profile_root: std::path::PathBuf) -> WorkerConfig {
    WorkerConfig {
        queue_request_url: "local".to_string(),
        queue_response_url: "local".to_string(),
        max_sessions: 2,
        port_start: 19222,
        port_end: 19223,
        default_ttl_min: 30,
        hard_ttl_min: 120,
        idle_timeout_sec: 90,
        devtools_wait_ms: 500,
        use_custom_launcher: false,
        launcher_cmd: None,
        // Deliberately unset: no chrome binary exists in the test sandbox,
        // so the launch is expected to fail deterministically.
        chrome_path: None,
        profile_reuse_enabled: false,
        profile_root,
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

/// A request that cannot be launched (no chrome on PATH in the sandbox)
/// must release its reserved port and leave the message for redelivery
/// rather than deleting it (§4.5 step 8).
#[tokio::test]
async fn launch_failure_releases_port_and_retains_message() {
    let workdir = tempfile::tempdir().unwrap();
    let profile_root = workdir.path().join("profiles");
    tokio::fs::create_dir_all(&profile_root).await.unwrap();

    tokio::fs::write(workdir.path().join("test_request.json"), r#"{"id":"req-1"}"#)
        .await
        .unwrap();

    let config = Arc::new(test_config(profile_root));
    let ports = Arc::new(PortRegistry::new(config.port_start, config.port_end));
    let sessions = Arc::new(SessionManager::new());
    let supervisor = Arc::new(ChromeSupervisor::new());
    let queue: Arc<dyn QueueClient> = Arc::new(LocalQueueClient::new(workdir.path().to_path_buf()));

    let dispatcher = Dispatcher::new(
        "w-test".to_string(),
        Arc::clone(&config),
        Arc::clone(&ports),
        Arc::clone(&sessions),
        supervisor,
        queue,
    );

    let before = ports.snapshot();
    assert_eq!(before.free_count, 2);

    dispatcher.iterate_for_test().await;

    let after = ports.snapshot();
    assert_eq!(after.free_count, 2, "port must be released back to FREE on launch failure");
    assert_eq!(sessions.count_active().await, 0);

    // Local mode has no visibility concept: the request file survives a
    // failed launch so the next iteration can retry it.
    assert!(tokio::fs::metadata(workdir.path().join("test_request.json")).await.is_ok());
}

/// A malformed request body is deleted immediately (poison message) and
/// never reaches admission.
#[tokio::test]
async fn poison_message_is_deleted_without_admission() {
    let workdir = tempfile::tempdir().unwrap();
    let profile_root = workdir.path().join("profiles");
    tokio::fs::create_dir_all(&profile_root).await.unwrap();
    tokio::fs::write(workdir.path().join("test_request.json"), "not json").await.unwrap();

    let config = Arc::new(test_config(profile_root));
    let ports = Arc::new(PortRegistry::new(config.port_start, config.port_end));
    let sessions = Arc::new(SessionManager::new());
    let supervisor = Arc::new(ChromeSupervisor::new());
    let queue: Arc<dyn QueueClient> = Arc::new(LocalQueueClient::new(workdir.path().to_path_buf()));

    let dispatcher = Dispatcher::new(
        "w-test".to_string(),
        Arc::clone(&config),
        Arc::clone(&ports),
        Arc::clone(&sessions),
        supervisor,
        queue,
    );

    dispatcher.iterate_for_test().await;

    assert!(tokio::fs::metadata(workdir.path().join("test_request.json")).await.is_err());
    assert_eq!(ports.snapshot().free_count, 2);
}
