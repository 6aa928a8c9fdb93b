use std::fmt;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use super::LockError;

/// Proof of holding a named lock. Only the holder of the lease can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    name: String,
    token: Uuid,
}

impl Lease {
    pub fn new(name: impl Into<String>) -> Self {
        Lease {
            name: name.into(),
            token: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.token)
    }
}

/// Named mutual exclusion across process instances.
///
/// In-memory providers use a lease table behind `Mutex` + `Condvar`;
/// distributed providers might use a database row lock, a compare-and-set
/// on a lease table, etcd leases, etc.
pub trait LockProvider: Send + Sync {
    /// Try to acquire `name`, waiting at most `timeout`.
    /// Returns `Ok(None)` if the lock is still held by someone else.
    fn try_acquire(&self, name: &str, timeout: Duration) -> Result<Option<Lease>, LockError>;

    /// Extend a held lease by the provider's lease lifetime. Fails with
    /// [`LockError::Expired`] once the lease was taken over.
    fn renew(&self, lease: &Lease) -> Result<(), LockError>;

    /// Release a lease obtained from this provider.
    fn release(&self, lease: &Lease) -> Result<(), LockError>;
}

impl<P: LockProvider + ?Sized> LockProvider for std::sync::Arc<P> {
    fn try_acquire(&self, name: &str, timeout: Duration) -> Result<Option<Lease>, LockError> {
        (**self).try_acquire(name, timeout)
    }

    fn renew(&self, lease: &Lease) -> Result<(), LockError> {
        (**self).renew(lease)
    }

    fn release(&self, lease: &Lease) -> Result<(), LockError> {
        (**self).release(lease)
    }
}

/// Releases its lease when dropped.
pub struct LeaseGuard<'a> {
    provider: &'a dyn LockProvider,
    name: String,
    lease: Option<Lease>,
}

impl<'a> LeaseGuard<'a> {
    pub fn acquire(
        provider: &'a dyn LockProvider,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Self>, LockError> {
        Ok(provider
            .try_acquire(name, timeout)?
            .map(|lease| LeaseGuard {
                provider,
                name: name.to_string(),
                lease: Some(lease),
            }))
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Keep the lease alive. After a failed renewal the guard no longer
    /// owns anything and dropping it releases nothing.
    pub fn renew(&mut self) -> Result<(), LockError> {
        let Some(lease) = &self.lease else {
            return Err(LockError::Expired(self.name.clone()));
        };
        match self.provider.renew(lease) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.lease = None;
                Err(err)
            }
        }
    }

    /// Release now and report the outcome instead of logging it on drop.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.lease.take() {
            Some(lease) => self.provider.release(&lease),
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(err) = self.provider.release(&lease) {
                warn!(lease = %lease, error = %err, "could not release lease");
            }
        }
    }
}
