//! Error types for the mock engine.

use thiserror::Error;

/// Error type for the mock engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine was scripted to refuse to start.
    #[error("mock engine refused to start: {0}")]
    Refused(String),
}
