use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a local node.
#[derive(Debug, Error)]
pub enum Error {
    /// Etcd error.
    #[error(transparent)]
    Etcd(#[from] localkv_etcd::Error),

    /// Etcd process engine error.
    #[error(transparent)]
    EtcdProcess(#[from] localkv_etcd_process::Error),

    /// An `--extra-config` entry was not of the form `component.key=value`.
    #[error("invalid extra config '{0}': expected component.key=value")]
    InvalidExtraConfig(String),

    /// A service exited while the node was running.
    #[error("{0} exited unexpectedly")]
    ServiceExited(String),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

impl Error {
    /// Whether a component failed to come up, as opposed to being misconfigured.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Etcd(e) => e.is_fatal(),
            Self::ServiceExited(_) => true,
            _ => false,
        }
    }
}
