use thiserror::Error;

/// Error type for lock operations.
///
/// Not being able to acquire a lock within the timeout is not an error;
/// providers report that as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lease table was poisoned (a thread panicked while holding it).
    #[error("lock poisoned: {0}")]
    Poisoned(String),
    /// The lease expired and was taken over before it was released.
    #[error("lease on `{0}` expired")]
    Expired(String),
}
