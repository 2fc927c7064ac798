//! Queue message shapes (§3 Data Model, §6 External Interfaces).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Incoming launch/delete request. Unknown fields are tolerated (§6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionRequest {
    pub id: String,
    #[serde(default)]
    pub requester_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub ttl_minutes: Option<u64>,
    #[serde(default)]
    pub proxy_config: Option<ProxyConfig>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub chrome_args: Option<Vec<String>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SessionRequest {
    pub fn is_delete(&self) -> bool {
        self.action.as_deref() == Some("delete")
    }

    /// Parse and validate a raw message body (§4.5 step 3). A `delete`
    /// action without a `session_id` is rejected as poison.
    pub fn parse(body: &str) -> Result<Self> {
        let request: SessionRequest =
            serde_json::from_str(body).map_err(|e| WorkerError::Validation(format!("malformed request body: {e}")))?;

        if request.is_delete() && request.session_id.is_none() {
            return Err(WorkerError::Validation(
                "delete action requires session_id".to_string(),
            ));
        }
        Ok(request)
    }
}

/// Outgoing callback/response payload (§6).
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub request_id: String,
    pub session_id: String,
    pub worker_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResponse {
    pub fn launched(
        request_id: &str,
        session_id: &str,
        worker_id: &str,
        debug_url: &str,
        websocket_url: &str,
        created_at: chrono::DateTime<chrono::Utc>,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            worker_id: worker_id.to_string(),
            status: "launched".to_string(),
            debug_url: Some(debug_url.to_string()),
            websocket_url: Some(websocket_url.to_string()),
            created_at: Some(created_at),
            expires_at: Some(expires_at),
            error: None,
        }
    }

    pub fn failed(request_id: &str, worker_id: &str, error_kind: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            session_id: String::new(),
            worker_id: worker_id.to_string(),
            status: "failed".to_string(),
            debug_url: None,
            websocket_url: None,
            created_at: None,
            expires_at: None,
            error: Some(error_kind.to_string()),
        }
    }
}
