//! Named locks used to keep recovery to a single process instance.

mod error;
mod in_memory;
mod provider;

pub use error::LockError;
pub use in_memory::{InMemoryLockProvider, DEFAULT_LEASE_TTL};
pub use provider::{Lease, LeaseGuard, LockProvider};
