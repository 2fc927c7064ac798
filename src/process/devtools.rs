//! DevTools HTTP probing: readiness polling after launch and periodic
//! health classification for live sessions (§4.3.2).

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, WorkerError};
use crate::session::model::HealthStatus;

const BACKOFF_START: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: String,
    #[serde(rename = "Browser")]
    pub browser: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "type")]
    pub target_type: String,
    pub url: String,
}

fn version_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/json/version")
}

fn list_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/json/list")
}

/// Poll `/json/version` with exponential backoff (200ms, doubling, capped
/// at 2s) until it answers or `wait` elapses (§4.3.1).
pub async fn wait_for_ready(client: &reqwest::Client, port: u16, wait: Duration) -> Result<VersionInfo> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut backoff = BACKOFF_START;

    loop {
        match probe_version(client, port).await {
            Ok(info) => return Ok(info),
            Err(_) if tokio::time::Instant::now() < deadline => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                tokio::time::sleep(backoff.min(remaining)).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
            Err(_) => return Err(WorkerError::LaunchTimeout(wait.as_millis() as u64)),
        }
    }
}

async fn probe_version(client: &reqwest::Client, port: u16) -> Result<VersionInfo> {
    let resp = client
        .get(version_url(port))
        .timeout(Duration::from_secs(2))
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.json::<VersionInfo>().await?)
}

/// Classify session health per the table in §4.3.2:
/// - `/json/version` unreachable (connection refused/reset) -> Crashed
/// - `/json/version` reachable but times out or errors transiently -> UnhealthyTransient
/// - `/json/list` empty (no targets) -> Closed
/// - `/json/list` has only `about:blank` pages -> Idle
/// - otherwise -> Active
pub async fn check_health(client: &reqwest::Client, port: u16) -> HealthStatus {
    let version = client.get(version_url(port)).timeout(Duration::from_secs(2)).send().await;

    let version = match version {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(_) => return HealthStatus::UnhealthyTransient,
        Err(e) if e.is_connect() => return HealthStatus::Crashed,
        Err(_) => return HealthStatus::UnhealthyTransient,
    };
    if version.json::<VersionInfo>().await.is_err() {
        return HealthStatus::UnhealthyTransient;
    }

    let list = client.get(list_url(port)).timeout(Duration::from_secs(2)).send().await;
    let targets: Vec<TargetInfo> = match list {
        Ok(resp) if resp.status().is_success() => match resp.json().await {
            Ok(t) => t,
            Err(_) => return HealthStatus::UnhealthyTransient,
        },
        Ok(_) => return HealthStatus::UnhealthyTransient,
        Err(e) if e.is_connect() => return HealthStatus::Crashed,
        Err(_) => return HealthStatus::UnhealthyTransient,
    };

    let pages: Vec<&TargetInfo> = targets.iter().filter(|t| t.target_type == "page").collect();
    if pages.is_empty() {
        return HealthStatus::Closed;
    }
    if pages.iter().all(|t| t.url == "about:blank") {
        return HealthStatus::Idle;
    }
    HealthStatus::Active
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_server(responses: Vec<(&'static str, &'static str)>) -> (tiny_http::Server, u16) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().port();
        let _ = responses;
        (server, port)
    }

    fn serve_once(server: &tiny_http::Server, path_to_body: &[(&str, &str)]) {
        if let Ok(Some(req)) = server.recv_timeout(Duration::from_secs(5)) {
            let url = req.url().to_string();
            let body = path_to_body
                .iter()
                .find(|(p, _)| url == *p)
                .map(|(_, b)| *b)
                .unwrap_or("{}");
            let response = tiny_http::Response::from_string(body);
            let _ = req.respond(response);
        }
    }

    #[test]
    fn version_url_and_list_url_are_localhost() {
        assert_eq!(version_url(9222), "http://127.0.0.1:9222/json/version");
        assert_eq!(list_url(9222), "http://127.0.0.1:9222/json/list");
    }

    #[tokio::test]
    async fn check_health_classifies_crashed_when_unreachable() {
        let client = reqwest::Client::new();
        // Nothing listens on this high port within the test run.
        let status = check_health(&client, 1).await;
        assert!(matches!(status, HealthStatus::Crashed | HealthStatus::UnhealthyTransient));
    }

    #[tokio::test]
    async fn wait_for_ready_times_out_when_nothing_answers() {
        let client = reqwest::Client::new();
        let err = wait_for_ready(&client, 1, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, WorkerError::LaunchTimeout(_)));
    }

    #[test]
    fn fake_devtools_server_reports_active_for_real_page() {
        let (server, port) = fake_server(vec![]);
        let handle = std::thread::spawn(move || {
            serve_once(
                &server,
                &[(
                    "/json/version",
                    r#"{"webSocketDebuggerUrl":"ws://127.0.0.1/x","Browser":"Chrome/1"}"#,
                )],
            );
            serve_once(
                &server,
                &[("/json/list", r#"[{"type":"page","url":"https://example.com"}]"#)],
            );
        });

        let rt = tokio::runtime::Runtime::new().unwrap();
        let status = rt.block_on(async {
            let client = reqwest::Client::new();
            check_health(&client, port).await
        });
        handle.join().unwrap();
        assert_eq!(status, HealthStatus::Active);
    }
}
