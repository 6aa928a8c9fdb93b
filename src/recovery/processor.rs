use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::dispatch::EventPublisher;
use crate::error::StoreError;
use crate::event::Event;
use crate::lock::{LeaseGuard, LockError, LockProvider};
use crate::registry::ProcessingSummary;
use crate::store::PublicationStore;

/// Something that can re-drive incomplete publications.
pub trait Resubmitter: Send + Sync {
    fn resubmit_incomplete(&self) -> Result<ProcessingSummary, StoreError>;

    fn resubmit_incomplete_older_than(&self, age: Duration)
        -> Result<ProcessingSummary, StoreError>;

    /// Resubmit while `proceed` keeps answering `true`. Implementations that
    /// deliver record by record should ask before each one; the default only
    /// asks once up front.
    fn resubmit_incomplete_while(
        &self,
        proceed: &mut dyn FnMut() -> bool,
    ) -> Result<ProcessingSummary, StoreError> {
        if proceed() {
            self.resubmit_incomplete()
        } else {
            Ok(ProcessingSummary::default())
        }
    }
}

impl<E: Event, St: PublicationStore<E>> Resubmitter for EventPublisher<E, St> {
    fn resubmit_incomplete(&self) -> Result<ProcessingSummary, StoreError> {
        EventPublisher::resubmit_incomplete(self)
    }

    fn resubmit_incomplete_older_than(
        &self,
        age: Duration,
    ) -> Result<ProcessingSummary, StoreError> {
        EventPublisher::resubmit_incomplete_older_than(self, age)
    }

    fn resubmit_incomplete_while(
        &self,
        proceed: &mut dyn FnMut() -> bool,
    ) -> Result<ProcessingSummary, StoreError> {
        EventPublisher::resubmit_incomplete_while(self, proceed)
    }
}

impl<R: Resubmitter + ?Sized> Resubmitter for Arc<R> {
    fn resubmit_incomplete(&self) -> Result<ProcessingSummary, StoreError> {
        (**self).resubmit_incomplete()
    }

    fn resubmit_incomplete_older_than(
        &self,
        age: Duration,
    ) -> Result<ProcessingSummary, StoreError> {
        (**self).resubmit_incomplete_older_than(age)
    }

    fn resubmit_incomplete_while(
        &self,
        proceed: &mut dyn FnMut() -> bool,
    ) -> Result<ProcessingSummary, StoreError> {
        (**self).resubmit_incomplete_while(proceed)
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Recovery is switched off.
    Disabled,
    /// Another instance holds the recovery lock. Expected on all but one
    /// instance of a fleet.
    LockNotAcquired { lock_name: String },
    /// The lease ran out mid-run and another instance took over. Records not
    /// yet visited were left to the new holder.
    LeaseLost {
        lock_name: String,
        summary: ProcessingSummary,
    },
    Resubmitted(ProcessingSummary),
}

enum Strategy {
    Disabled,
    Unconditional,
    Exclusive {
        provider: Arc<dyn LockProvider>,
        lock_name: String,
        timeout: Duration,
    },
}

/// Resubmits every incomplete publication once.
pub struct RecoveryProcessor {
    strategy: Strategy,
}

impl RecoveryProcessor {
    pub fn disabled() -> Self {
        RecoveryProcessor {
            strategy: Strategy::Disabled,
        }
    }

    /// Resubmit without coordination. Only safe for single-instance
    /// deployments or idempotent targets.
    pub fn default_recovery() -> Self {
        RecoveryProcessor {
            strategy: Strategy::Unconditional,
        }
    }

    /// Resubmit only while holding `lock_name`, waiting at most `timeout`
    /// for it.
    pub fn exclusive(
        provider: Arc<dyn LockProvider>,
        lock_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        RecoveryProcessor {
            strategy: Strategy::Exclusive {
                provider,
                lock_name: lock_name.into(),
                timeout,
            },
        }
    }

    /// Pick the variant from configuration. A configured lock name selects
    /// the exclusive variant backed by `provider`.
    pub fn from_config(config: &RecoveryConfig, provider: Arc<dyn LockProvider>) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match &config.lock_name {
            Some(lock_name) => Self::exclusive(provider, lock_name.clone(), config.lock_timeout),
            None => Self::default_recovery(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.strategy, Strategy::Disabled)
    }

    pub fn run<R: Resubmitter + ?Sized>(
        &self,
        resubmitter: &R,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        match &self.strategy {
            Strategy::Disabled => Ok(RecoveryOutcome::Disabled),
            Strategy::Unconditional => {
                let summary = resubmitter.resubmit_incomplete()?;
                info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    "incomplete publications resubmitted on startup"
                );
                Ok(RecoveryOutcome::Resubmitted(summary))
            }
            Strategy::Exclusive {
                provider,
                lock_name,
                timeout,
            } => {
                let Some(mut guard) = LeaseGuard::acquire(provider.as_ref(), lock_name, *timeout)? else {
                    info!(lock = %lock_name, "recovery lock held elsewhere, skipping resubmission");
                    return Ok(RecoveryOutcome::LockNotAcquired {
                        lock_name: lock_name.clone(),
                    });
                };

                // renewed before every record so the lease outlives the backlog
                let mut lost = false;
                let summary = resubmitter.resubmit_incomplete_while(&mut || match guard.renew() {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(lock = %lock_name, error = %err, "recovery lease lost, stopping resubmission");
                        lost = true;
                        false
                    }
                })?;
                drop(guard);

                if lost {
                    return Ok(RecoveryOutcome::LeaseLost {
                        lock_name: lock_name.clone(),
                        summary,
                    });
                }
                info!(
                    lock = %lock_name,
                    completed = summary.completed,
                    failed = summary.failed,
                    "incomplete publications resubmitted under lock"
                );
                Ok(RecoveryOutcome::Resubmitted(summary))
            }
        }
    }
}
