use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::instant_before;
use crate::error::StoreError;
use crate::event::{Event, Published};
use crate::publication::{PublicationId, PublicationRecord, TargetIdentifier};
use crate::registry::{filters, ProcessingSummary, PublicationRegistry};
use crate::store::PublicationStore;

use super::error::{HandlerError, PublishError};
use super::targets::Targets;

/// A delivery that failed during dispatch. The publication stays incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub publication_id: PublicationId,
    pub target: TargetIdentifier,
    pub reason: String,
}

/// Outcome of delivering a committed unit of work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub completed: Vec<PublicationId>,
    pub failed: Vec<DeliveryFailure>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Publishes events to registered targets with durable bookkeeping.
///
/// Records are created for every resolved target before any target runs.
/// Successful deliveries are marked completed; failures are appended to the
/// record and left for resubmission.
pub struct EventPublisher<E, St> {
    registry: Arc<PublicationRegistry<E, St>>,
    targets: Arc<Targets<E>>,
}

impl<E, St> Clone for EventPublisher<E, St> {
    fn clone(&self) -> Self {
        EventPublisher {
            registry: Arc::clone(&self.registry),
            targets: Arc::clone(&self.targets),
        }
    }
}

impl<E: Event, St: PublicationStore<E>> EventPublisher<E, St> {
    pub fn new(registry: PublicationRegistry<E, St>, targets: Targets<E>) -> Self {
        Self::from_shared(Arc::new(registry), Arc::new(targets))
    }

    pub fn from_shared(registry: Arc<PublicationRegistry<E, St>>, targets: Arc<Targets<E>>) -> Self {
        EventPublisher { registry, targets }
    }

    pub fn registry(&self) -> &PublicationRegistry<E, St> {
        &self.registry
    }

    pub fn targets(&self) -> &Targets<E> {
        &self.targets
    }

    /// Start a unit of work. Events published into it only become durable
    /// (and are only delivered) when it commits.
    pub fn begin(&self) -> UnitOfWork<'_, E, St> {
        UnitOfWork {
            publisher: self,
            pending: Vec::new(),
        }
    }

    /// Publish a single event in its own unit of work.
    pub fn publish(&self, event: E) -> Result<DispatchReport, PublishError> {
        let mut unit = self.begin();
        unit.publish(event);
        unit.commit()
    }

    /// Re-drive every incomplete publication through its target.
    pub fn resubmit_incomplete(&self) -> Result<ProcessingSummary, StoreError> {
        self.resubmit_matching(filters::all())
    }

    /// Re-drive incomplete publications published more than `age` ago.
    pub fn resubmit_incomplete_older_than(
        &self,
        age: Duration,
    ) -> Result<ProcessingSummary, StoreError> {
        let cutoff = instant_before(self.registry.clock().now(), age);
        self.resubmit_matching(filters::published_before(cutoff))
    }

    /// Re-drive incomplete publications accepted by `filter`.
    pub fn resubmit_matching<F>(&self, filter: F) -> Result<ProcessingSummary, StoreError>
    where
        F: Fn(&PublicationRecord<E>) -> bool,
    {
        self.resubmit(filter, || true)
    }

    /// Re-drive every incomplete publication, asking `proceed` before each
    /// delivery and stopping once it answers `false`.
    pub fn resubmit_incomplete_while<P>(&self, proceed: P) -> Result<ProcessingSummary, StoreError>
    where
        P: FnMut() -> bool,
    {
        self.resubmit(filters::all(), proceed)
    }

    fn resubmit<F, P>(&self, filter: F, proceed: P) -> Result<ProcessingSummary, StoreError>
    where
        F: Fn(&PublicationRecord<E>) -> bool,
        P: FnMut() -> bool,
    {
        let summary = self.registry.process_incomplete_while(filter, proceed, |record| {
            self.targets.invoke(record.target(), record.event())
        })?;
        debug!(
            processed = summary.processed,
            completed = summary.completed,
            failed = summary.failed,
            remaining = summary.remaining,
            "incomplete publications resubmitted"
        );
        Ok(summary)
    }

    fn deliver(&self, publications: &[PublicationRecord<E>], report: &mut DispatchReport) {
        for publication in publications {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.targets.invoke(publication.target(), publication.event())
            }))
            .unwrap_or_else(|_| Err(HandlerError::Panicked(publication.target().to_string())));

            let now = self.registry.clock().now();
            let failure = match outcome {
                Ok(()) => match self.registry.mark_completed(publication, now) {
                    Ok(()) => {
                        report.completed.push(publication.id());
                        continue;
                    }
                    // delivered, but bookkeeping failed: redelivery will follow
                    Err(err) => format!("completion not stored: {err}"),
                },
                Err(err) => {
                    let reason = err.to_string();
                    if let Err(store_err) = self.registry.mark_failed(publication, now, reason.clone()) {
                        warn!(publication_id = %publication.id(), error = %store_err, "could not record failure");
                    }
                    reason
                }
            };

            warn!(
                publication_id = %publication.id(),
                target = %publication.target(),
                reason = %failure,
                "delivery failed"
            );
            report.failed.push(DeliveryFailure {
                publication_id: publication.id(),
                target: publication.target().clone(),
                reason: failure,
            });
        }
    }
}

/// Events published within one unit of work.
///
/// Dropping the unit (or calling [`rollback`](UnitOfWork::rollback)) discards
/// the events without creating any publication.
pub struct UnitOfWork<'a, E, St> {
    publisher: &'a EventPublisher<E, St>,
    pending: Vec<Published<E>>,
}

impl<'a, E: Event, St: PublicationStore<E>> UnitOfWork<'a, E, St> {
    /// Publish an event. Returns its instance handle, which identifies the
    /// exact publications created for it.
    pub fn publish(&mut self, event: E) -> Published<E> {
        let published = Published::new(event);
        self.pending.push(published.clone());
        published
    }

    /// Publish an already wrapped instance.
    pub fn publish_instance(&mut self, event: Published<E>) {
        self.pending.push(event);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Make the publications durable, then deliver them.
    ///
    /// If any publication cannot be stored (including serialization
    /// failures) none of this unit's publications remain and the error is
    /// returned. Delivery failures are reported, not raised.
    pub fn commit(self) -> Result<DispatchReport, PublishError> {
        let registry = self.publisher.registry();
        let mut stored: Vec<PublicationRecord<E>> = Vec::new();

        for event in &self.pending {
            let targets = self.publisher.targets.resolve(event.event());
            if targets.is_empty() {
                debug!(event_type = event.event_type(), "no targets for event");
                continue;
            }
            match registry.store(event, targets) {
                Ok(records) => stored.extend(records),
                Err(err) => {
                    let ids: Vec<_> = stored.iter().map(PublicationRecord::id).collect();
                    if let Err(cleanup) = registry.delete_publications(&ids) {
                        warn!(error = %cleanup, "could not discard publications of failed unit of work");
                    }
                    return Err(err.into());
                }
            }
        }

        let mut report = DispatchReport::default();
        self.publisher.deliver(&stored, &mut report);
        Ok(report)
    }

    /// Discard every event of this unit.
    pub fn rollback(self) {
        debug!(discarded = self.pending.len(), "unit of work rolled back");
    }
}
