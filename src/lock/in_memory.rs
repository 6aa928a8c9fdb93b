use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::config::RecoveryConfig;

use super::{Lease, LockError, LockProvider};

/// How long an unreleased lease blocks other holders by default.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

struct Held {
    token: Uuid,
    /// `None` when the lifetime is too large to represent: never expires.
    expires_at: Option<Instant>,
}

impl Held {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// The earlier of two optional instants, `None` meaning "never".
fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// In-process lease table backed by `Mutex<HashMap<..>>` + `Condvar`.
///
/// Waiters are woken on release and otherwise re-check when the current
/// lease runs out, so an abandoned lease (holder crashed without releasing)
/// is taken over once its TTL has elapsed.
pub struct InMemoryLockProvider {
    leases: Mutex<HashMap<String, Held>>,
    released: Condvar,
    lease_ttl: Duration,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::with_lease_ttl(DEFAULT_LEASE_TTL)
    }

    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        InMemoryLockProvider {
            leases: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            lease_ttl,
        }
    }

    /// Provider whose leases live as long as the recovery config says.
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::with_lease_ttl(config.lease_ttl)
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Whether a live (unexpired) lease exists for `name`.
    pub fn is_held(&self, name: &str) -> Result<bool, LockError> {
        let leases = self.table()?;
        let now = Instant::now();
        Ok(leases.get(name).is_some_and(|held| !held.is_expired(now)))
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<String, Held>>, LockError> {
        self.leases
            .lock()
            .map_err(|e| LockError::Poisoned(e.to_string()))
    }
}

impl Default for InMemoryLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(&self, name: &str, timeout: Duration) -> Result<Option<Lease>, LockError> {
        // unrepresentable deadline: wait until released or expired
        let deadline = Instant::now().checked_add(timeout);
        let mut leases = self.table()?;

        loop {
            let now = Instant::now();
            let held_until = leases
                .get(name)
                .filter(|held| !held.is_expired(now))
                .map(|held| held.expires_at);

            let wake_at = match held_until {
                Some(expires_at) => earliest(expires_at, deadline),
                None => {
                    let lease = Lease::new(name);
                    leases.insert(
                        name.to_string(),
                        Held {
                            token: lease.token(),
                            expires_at: now.checked_add(self.lease_ttl),
                        },
                    );
                    debug!(lock = name, "lease acquired");
                    return Ok(Some(lease));
                }
            };

            if deadline.is_some_and(|deadline| now >= deadline) {
                debug!(lock = name, "lease still held by another owner");
                return Ok(None);
            }

            leases = match wake_at {
                Some(wake_at) => {
                    self.released
                        .wait_timeout(leases, wake_at.saturating_duration_since(now))
                        .map_err(|e| LockError::Poisoned(e.to_string()))?
                        .0
                }
                None => self
                    .released
                    .wait(leases)
                    .map_err(|e| LockError::Poisoned(e.to_string()))?,
            };
        }
    }

    fn renew(&self, lease: &Lease) -> Result<(), LockError> {
        let mut leases = self.table()?;
        let now = Instant::now();
        match leases.get_mut(lease.name()) {
            Some(held) if held.token == lease.token() && !held.is_expired(now) => {
                held.expires_at = now.checked_add(self.lease_ttl);
                Ok(())
            }
            _ => Err(LockError::Expired(lease.name().to_string())),
        }
    }

    fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut leases = self.table()?;
        match leases.get(lease.name()) {
            Some(held) if held.token == lease.token() => {
                leases.remove(lease.name());
                self.released.notify_all();
                debug!(lock = lease.name(), "lease released");
                Ok(())
            }
            _ => Err(LockError::Expired(lease.name().to_string())),
        }
    }
}
