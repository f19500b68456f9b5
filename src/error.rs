use std::time::Duration;

use thiserror::Error as ThisError;

/// Errors reported synchronously to callers of the orchestrator.
///
/// Collector-internal failures never surface here; they are
/// visible only through `get_status()` and the alert sinks.
#[derive(ThisError, Debug)]
pub enum PipelineError {
    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("Unknown collector: {0}")]
    UnknownCollector(String),

    #[error("Pipeline is not running")]
    NotRunning,

    #[error("Invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Collector(#[from] CollectorError),
}

/// Failures inside a single collector.
#[derive(ThisError, Debug)]
pub enum CollectorError {
    #[error("Invalid interval for {name}: {interval:?}")]
    InvalidInterval { name: String, interval: Duration },

    #[error("Fetch failed for {target}: {message}")]
    Fetch { target: String, message: String },

    #[error("Fetch timed out for {target} after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Persist failed for {source_id}: {cause}")]
    Persist { source_id: String, cause: SinkError },
}

/// A raw item that could not be mapped into a `NormalizedRecord`.
#[derive(ThisError, Debug)]
pub enum NormalizeError {
    #[error("Malformed {feed} item: {message}")]
    Malformed { feed: String, message: String },

    #[error("Missing field `{field}` in {feed} item")]
    MissingField { feed: String, field: &'static str },

    #[error("Unsupported feed: {0}")]
    UnsupportedFeed(String),
}

impl NormalizeError {
    pub fn malformed(feed: &str, err: impl std::fmt::Display) -> Self {
        NormalizeError::Malformed {
            feed: feed.to_string(),
            message: err.to_string(),
        }
    }
}

/// Failures raised by persistence and alert backends.
#[derive(ThisError, Debug)]
pub enum SinkError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend error: {0}")]
    Backend(String),
}
