//! Local filesystem queue (§6): single-host mode selected when
//! `queue_request_url == "local"`. A request file is polled, consumed,
//! and deleted; there is exactly one outstanding message at a time so the
//! file path itself doubles as the receipt.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WorkerError};
use crate::queue::client::{QueueClient, QueueMessage};

pub const REQUEST_FILE: &str = "test_request.json";
pub const STATUS_REQUEST_FILE: &str = "test_status_request.json";

pub struct LocalQueueClient {
    workdir: PathBuf,
}

impl LocalQueueClient {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    fn request_path(&self) -> PathBuf {
        self.workdir.join(REQUEST_FILE)
    }

    /// Check for (and consume) a pending status-snapshot trigger (§6).
    pub async fn poll_status_request(&self) -> bool {
        let path = self.workdir.join(STATUS_REQUEST_FILE);
        if tokio::fs::metadata(&path).await.is_ok() {
            let _ = tokio::fs::remove_file(&path).await;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl QueueClient for LocalQueueClient {
    /// Poll for the request file until it appears or `wait` elapses.
    /// Local mode has no visibility concept, so `visibility` is unused.
    async fn receive(&self, max_messages: usize, wait: Duration, _visibility: Duration) -> Result<Vec<QueueMessage>> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let path = self.request_path();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::fs::read_to_string(&path).await {
                Ok(body) => {
                    return Ok(vec![QueueMessage {
                        receipt: path.display().to_string(),
                        body,
                    }]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(Vec::new());
                    }
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(e) => return Err(WorkerError::Io(e)),
            }
        }
    }

    /// The only "delete" a local message needs is removing the file.
    async fn delete(&self, receipt: &str) -> Result<()> {
        match tokio::fs::remove_file(receipt).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkerError::Io(e)),
        }
    }

    /// Local mode has no visibility concept; redelivery just means the
    /// file is left in place for the caller to notice and rewrite.
    async fn extend_visibility(&self, _receipt: &str, _delta: Duration) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_returns_empty_when_no_file_before_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalQueueClient::new(dir.path().to_path_buf());
        let messages = client.receive(1, Duration::from_millis(300), Duration::from_secs(60)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn receive_picks_up_existing_request_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(REQUEST_FILE), r#"{"id":"req-1"}"#)
            .await
            .unwrap();
        let client = LocalQueueClient::new(dir.path().to_path_buf());
        let messages = client.receive(1, Duration::from_millis(300), Duration::from_secs(60)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].body.contains("req-1"));
    }

    #[tokio::test]
    async fn delete_removes_the_request_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REQUEST_FILE);
        tokio::fs::write(&path, "{}").await.unwrap();
        let client = LocalQueueClient::new(dir.path().to_path_buf());
        client.delete(path.to_str().unwrap()).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn status_request_file_is_detected_and_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalQueueClient::new(dir.path().to_path_buf());
        assert!(!client.poll_status_request().await);
        tokio::fs::write(dir.path().join(STATUS_REQUEST_FILE), "{}").await.unwrap();
        assert!(client.poll_status_request().await);
        assert!(!client.poll_status_request().await);
    }
}
