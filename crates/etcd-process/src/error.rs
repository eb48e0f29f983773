use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The etcd binary could not be found.
    #[error("etcd binary not found")]
    BinaryNotFound,

    /// The HTTP client used for health checks could not be built.
    #[error("failed to build health check client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The process started but could not be tracked.
    #[error("failed to spawn etcd: {0}")]
    Spawn(String),
}
