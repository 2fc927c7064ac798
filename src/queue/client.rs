//! Queue client abstraction (§4.5, §5). Two implementations exist:
//! an HTTP-backed remote queue and a local filesystem queue for
//! single-host testing (§6).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// One fetched message: raw body plus a receipt used to delete it or
/// extend its visibility.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll for up to `max_messages`, waiting up to `wait` for at
    /// least one to arrive, with each delivered message invisible to other
    /// consumers for `visibility` (§4.5 step 2).
    async fn receive(&self, max_messages: usize, wait: Duration, visibility: Duration) -> Result<Vec<QueueMessage>>;

    /// Permanently remove a message (successful or poison) (§4.5 step 3-4).
    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Extend (or reset to zero) a message's visibility timeout, the
    /// mechanism behind every back-pressure policy in §5/§7.
    async fn extend_visibility(&self, receipt: &str, delta: Duration) -> Result<()>;
}

/// Visibility-extension deltas for the three back-pressure policies (§5).
pub mod backoff {
    use std::time::Duration;

    pub const NO_SLOTS: Duration = Duration::from_secs(30);
    pub const LAUNCH_FAILED: Duration = Duration::from_secs(10);
    pub const UNEXPECTED_ERROR: Duration = Duration::from_secs(15);
    pub const CALLBACK_FAILED: Duration = Duration::from_secs(10);
    /// `extend_visibility(receipt, 0)` releases the message back for
    /// immediate redelivery (§4.5 step 4, delete-action not owned here).
    pub const RELEASE_IMMEDIATELY: Duration = Duration::from_secs(0);
}

/// Default visibility timeout: launch budget (devtools wait, ~90s) plus a
/// 5s buffer (§4.5 step 2).
pub fn default_visibility_timeout(devtools_wait: Duration) -> Duration {
    devtools_wait + Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_visibility_adds_buffer() {
        let vt = default_visibility_timeout(Duration::from_secs(90));
        assert_eq!(vt, Duration::from_secs(95));
    }
}
