use std::time::Duration;

use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Start was called on a server that has already been started.
    #[error("etcd server already started")]
    AlreadyStarted,

    /// The host address used for the client advertise URL was blank.
    #[error("host address must not be empty")]
    EmptyHostAddress,

    /// An endpoint carries something etcd cannot take, such as a path.
    #[error("endpoint '{endpoint}' must not have a {part}")]
    EndpointNotBare {
        /// The offending endpoint text.
        endpoint: String,

        /// The part of the URL that is not allowed.
        part: &'static str,
    },

    /// The engine refused to start.
    #[error("engine failed to start: {0}")]
    EngineStart(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A derived or overridden endpoint is not a valid URL.
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// The offending endpoint text.
        endpoint: String,

        /// Why it failed to parse.
        #[source]
        source: url::ParseError,
    },

    /// The engine did not signal readiness before the startup deadline.
    #[error("{component} took too long to start ({elapsed:?})")]
    ReadinessTimeout {
        /// The component that timed out.
        component: &'static str,

        /// How long start waited before giving up.
        elapsed: Duration,
    },

    /// The engine reported that it could not become ready.
    #[error("{component} failed to start: {reason}")]
    StartupFailed {
        /// The component that failed.
        component: &'static str,

        /// The engine's explanation.
        reason: String,
    },

    /// An override addressed a key the configuration does not have.
    #[error("unknown etcd config key '{0}'")]
    UnknownOverride(String),
}

impl Error {
    /// Whether the error means the node could not confirm its own readiness.
    ///
    /// Callers must not keep a process running after a fatal error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EngineStart(_) | Self::ReadinessTimeout { .. } | Self::StartupFailed { .. }
        )
    }
}
