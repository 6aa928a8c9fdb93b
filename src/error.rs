use thiserror::Error;

use crate::serializer::SerializationError;

/// Errors raised by publication stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("table {0} does not exist (schema initialization disabled?)")]
    MissingTable(&'static str),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
