use thiserror::Error;

/// Crate-wide error type. Most variants are recovered locally by the
/// dispatcher or session manager and never propagate past the component
/// that produced them; only `Config` at startup reaches `main`.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("no ports available in range")]
    NoPortsAvailable,

    #[error("port {0} is not reserved")]
    NotReserved(u16),

    #[error("port {0} reserved by a different holder")]
    HolderMismatch(u16),

    #[error("chrome launch failed: {0}")]
    LaunchFailed(String),

    #[error("devtools readiness probe timed out after {0}ms")]
    LaunchTimeout(u64),

    #[error("callback delivery failed: {0}")]
    CallbackFailed(String),

    #[error("queue client error: {0}")]
    Queue(String),

    #[error("session {0} not found")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
