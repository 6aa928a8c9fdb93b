use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::{instant_before, Clock, SystemClock};
use crate::dispatch::HandlerError;
use crate::error::StoreError;
use crate::event::{Event, Published};
use crate::publication::{FailedAttempt, PublicationId, PublicationRecord, TargetIdentifier};
use crate::store::PublicationStore;

use super::in_flight::InFlightPublications;

/// Counters from one pass over incomplete publications.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Records handed to the consumer.
    pub processed: usize,
    /// Records the consumer handled and that were marked completed.
    pub completed: usize,
    /// Records whose consumer failed (or whose completion could not be stored).
    pub failed: usize,
    /// Records rejected by the filter.
    pub skipped: usize,
    /// Records never visited because processing was halted.
    pub remaining: usize,
}

impl ProcessingSummary {
    pub fn merge(&mut self, other: ProcessingSummary) {
        self.processed += other.processed;
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.remaining += other.remaining;
    }

    /// Whether processing stopped before visiting every record.
    pub fn was_halted(&self) -> bool {
        self.remaining > 0
    }
}

/// The orchestration point between "an event was published" and "the store
/// holds durable records for it".
pub struct PublicationRegistry<E, St> {
    store: St,
    in_flight: InFlightPublications<E>,
    clock: Arc<dyn Clock>,
}

impl<E: Event, St: PublicationStore<E>> PublicationRegistry<E, St> {
    pub fn new(store: St) -> Self {
        PublicationRegistry {
            store,
            in_flight: InFlightPublications::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a different time source for publication and completion dates.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store_backend(&self) -> &St {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Create one incomplete publication per target and track them as in
    /// flight for this event instance.
    ///
    /// Either all records for the event are created or none are: on a store
    /// failure the records created so far are removed again.
    pub fn store<I>(
        &self,
        event: &Published<E>,
        targets: I,
    ) -> Result<Vec<PublicationRecord<E>>, StoreError>
    where
        I: IntoIterator<Item = TargetIdentifier>,
    {
        let publication_date = self.clock.now();
        let mut created = Vec::new();

        for target in targets {
            let record = PublicationRecord::new(event.shared(), target, publication_date);
            match self.store.create(record) {
                Ok(record) => {
                    self.in_flight.register(event.instance(), record.clone());
                    created.push(record);
                }
                Err(err) => {
                    self.discard(&created);
                    return Err(err);
                }
            }
        }

        debug!(
            instance = %event.instance(),
            event_type = event.event_type(),
            publications = created.len(),
            "event publications stored"
        );
        Ok(created)
    }

    /// The in-flight publication of this exact event instance for `target`.
    pub fn find_in_flight(
        &self,
        event: &Published<E>,
        target: &TargetIdentifier,
    ) -> Option<PublicationRecord<E>> {
        self.in_flight.find(event.instance(), target)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Complete a publication by id and forget it as in flight.
    ///
    /// The publication leaves the in-flight index even if the completion
    /// cannot be stored; resubmission completes it by id later.
    pub fn mark_completed(
        &self,
        publication: &PublicationRecord<E>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = self.store.mark_completed_by_id(publication.id(), at);
        self.in_flight.remove(publication.id());
        result.map(|_| ())
    }

    /// Complete the publication of `event` for `target`.
    ///
    /// The in-flight index resolves the exact instance. Without an in-flight
    /// entry (delivery in another call stack or process) the store matches by
    /// content, completing the oldest incomplete match.
    pub fn mark_completed_for(
        &self,
        event: &Published<E>,
        target: &TargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.in_flight.find(event.instance(), target) {
            Some(publication) => {
                let completed = self.store.mark_completed_by_id(publication.id(), at);
                self.in_flight.remove(publication.id());
                completed
            }
            None => self.store.mark_completed(event.event(), target, at),
        }
    }

    /// Record a failed delivery attempt.
    ///
    /// The publication leaves the in-flight index even if the failure cannot
    /// be stored, so a later identical-looking event is never matched to it.
    pub fn mark_failed(
        &self,
        publication: &PublicationRecord<E>,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), StoreError> {
        let result = self
            .store
            .record_failure(publication.id(), FailedAttempt::new(at, reason));
        self.in_flight.remove(publication.id());
        result
    }

    /// Drive every incomplete publication accepted by `filter` through
    /// `consumer`, oldest first.
    ///
    /// A consumer error (or panic) is recorded as a failed attempt on that
    /// record and processing continues with the next one.
    pub fn process_incomplete<F, C>(
        &self,
        filter: F,
        consumer: C,
    ) -> Result<ProcessingSummary, StoreError>
    where
        F: Fn(&PublicationRecord<E>) -> bool,
        C: FnMut(&PublicationRecord<E>) -> Result<(), HandlerError>,
    {
        self.process_incomplete_while(filter, || true, consumer)
    }

    /// Like [`process_incomplete`](Self::process_incomplete), but asks
    /// `proceed` before handing each accepted record to `consumer` and stops
    /// as soon as it answers `false`. Unvisited records are counted as
    /// `remaining` and stay incomplete.
    pub fn process_incomplete_while<F, P, C>(
        &self,
        filter: F,
        mut proceed: P,
        mut consumer: C,
    ) -> Result<ProcessingSummary, StoreError>
    where
        F: Fn(&PublicationRecord<E>) -> bool,
        P: FnMut() -> bool,
        C: FnMut(&PublicationRecord<E>) -> Result<(), HandlerError>,
    {
        let mut summary = ProcessingSummary::default();
        let records = self.store.find_incomplete()?;
        let total = records.len();

        for (position, record) in records.into_iter().enumerate() {
            if !filter(&record) {
                summary.skipped += 1;
                continue;
            }
            if !proceed() {
                summary.remaining = total - position;
                debug!(remaining = summary.remaining, "processing of incomplete publications halted");
                break;
            }
            summary.processed += 1;

            let outcome = catch_unwind(AssertUnwindSafe(|| consumer(&record)))
                .unwrap_or_else(|_| Err(HandlerError::Panicked(record.target().to_string())));

            match outcome {
                Ok(()) => match self.mark_completed(&record, self.clock.now()) {
                    Ok(()) => summary.completed += 1,
                    Err(err) => {
                        warn!(publication_id = %record.id(), error = %err, "could not store completion");
                        summary.failed += 1;
                    }
                },
                Err(err) => {
                    warn!(
                        publication_id = %record.id(),
                        target = %record.target(),
                        error = %err,
                        "resubmission failed"
                    );
                    if let Err(store_err) = self.mark_failed(&record, self.clock.now(), err.to_string()) {
                        warn!(publication_id = %record.id(), error = %store_err, "could not record failure");
                    }
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    pub fn find_incomplete(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        self.store.find_incomplete()
    }

    /// Incomplete publications published more than `age` ago.
    pub fn find_incomplete_older_than(
        &self,
        age: Duration,
    ) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        self.store
            .find_incomplete_published_before(instant_before(self.clock.now(), age))
    }

    pub fn find_by_event_and_target(
        &self,
        event: &E,
        target: &TargetIdentifier,
    ) -> Result<Option<PublicationRecord<E>>, StoreError> {
        self.store.find_by_event_and_target(event, target)
    }

    pub fn find_completed(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        self.store.find_completed()
    }

    pub fn delete_completed(&self) -> Result<usize, StoreError> {
        self.store.delete_completed()
    }

    /// Purge completed publications that were completed more than `age` ago.
    pub fn delete_completed_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        self.store
            .delete_completed_before(instant_before(self.clock.now(), age))
    }

    /// Remove publications outright, whatever their state.
    pub fn delete_publications(&self, ids: &[PublicationId]) -> Result<usize, StoreError> {
        let removed = self.store.delete_by_identifiers(ids)?;
        for id in ids {
            self.in_flight.remove(*id);
        }
        Ok(removed)
    }

    fn discard(&self, created: &[PublicationRecord<E>]) {
        let ids: Vec<_> = created.iter().map(PublicationRecord::id).collect();
        for id in &ids {
            self.in_flight.remove(*id);
        }
        if let Err(err) = self.store.delete_by_identifiers(&ids) {
            warn!(error = %err, publications = ids.len(), "could not discard partially stored publications");
        }
    }
}
