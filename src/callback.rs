//! Callback delivery (§4.5 step 7c, §6): POST the response payload to the
//! configured URL, bounded by `callback_timeout_sec`.

use std::time::Duration;

use crate::error::{Result, WorkerError};
use crate::queue::SessionResponse;

pub async fn deliver(client: &reqwest::Client, callback_url: &str, timeout: Duration, payload: &SessionResponse) -> Result<()> {
    client
        .post(callback_url)
        .json(payload)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| WorkerError::CallbackFailed(e.to_string()))?
        .error_for_status()
        .map_err(|e| WorkerError::CallbackFailed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn callback_to_unreachable_host_fails_as_callback_failed() {
        let client = reqwest::Client::new();
        let payload = SessionResponse::launched(
            "req-1",
            "s-1",
            "w-1",
            "http://127.0.0.1:9222/json",
            "ws://127.0.0.1:9222/devtools/browser/x",
            Utc::now(),
            Utc::now(),
        );
        let err = deliver(&client, "http://127.0.0.1:1/nope", Duration::from_millis(300), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::CallbackFailed(_)));
    }
}
