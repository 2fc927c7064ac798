pub mod client;
pub mod http;
pub mod local;
pub mod request;

pub use client::{backoff, default_visibility_timeout, QueueClient, QueueMessage};
pub use http::HttpQueueClient;
pub use local::LocalQueueClient;
pub use request::{ProxyConfig, SessionRequest, SessionResponse};
