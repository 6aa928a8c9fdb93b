//! Error types for delivery targets and publishing.

use thiserror::Error;

use crate::error::StoreError;
use crate::publication::TargetIdentifier;

/// Error returned by a target handler. Recorded as a failed attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered under this target identifier.
    #[error("unknown target: {0}")]
    UnknownTarget(TargetIdentifier),
    /// The handler rejected the event.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The handler panicked.
    #[error("handler for {0} panicked")]
    Panicked(String),
    /// Any other error.
    #[error("handler error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

/// Error returned when publications cannot be made durable.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not store publications: {0}")]
    Store(#[from] StoreError),
}
