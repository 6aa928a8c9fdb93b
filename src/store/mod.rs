//! Publication Store - pluggable persistence for publication records.
//!
//! Every backend satisfies the same behavioural contract:
//! - `create` never deduplicates
//! - completion is idempotent (completing twice equals completing once)
//! - incomplete records come back oldest-first
//! - an unreadable payload is skipped on read, never raised
//! - mutations are targeted (by id, or by content hash + target)
//!
//! What "completed" means for storage is decided by the store's
//! [`CompletionMode`].
//!
//! ## Example
//!
//! ```ignore
//! use publication_registry::{InMemoryDatabase, InMemoryPublicationStore, CompletionMode};
//!
//! let database = InMemoryDatabase::new();
//! let store = InMemoryPublicationStore::json(database.clone())
//!     .with_completion_mode(CompletionMode::Archive);
//! store.initialize_schema()?;
//! ```

mod in_memory;
mod row;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::event::Event;
use crate::publication::{
    CompletionMode, FailedAttempt, PublicationId, PublicationRecord, TargetIdentifier,
};

pub use in_memory::{InMemoryDatabase, InMemoryPublicationStore, ARCHIVE_TABLE, PUBLICATION_TABLE};
pub use row::{content_hash, PublicationRow};

/// Persistence contract for publication records.
///
/// All operations must be safe to call from several processes against the
/// same backing storage.
pub trait PublicationStore<E: Event>: Send + Sync {
    /// The completion policy this store applies.
    fn completion_mode(&self) -> CompletionMode;

    /// Persist a new incomplete record.
    fn create(&self, record: PublicationRecord<E>) -> Result<PublicationRecord<E>, StoreError>;

    /// Complete the oldest incomplete record whose serialized event matches
    /// `event` and whose target is `target`. Returns whether a record
    /// transitioned.
    fn mark_completed(
        &self,
        event: &E,
        target: &TargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Complete a record by id. A missing or already completed record is a
    /// no-op returning `false`.
    fn mark_completed_by_id(&self, id: PublicationId, at: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Append a failed attempt to a live record. Unknown ids are ignored.
    fn record_failure(&self, id: PublicationId, attempt: FailedAttempt) -> Result<(), StoreError>;

    /// All incomplete records, oldest publication date first.
    fn find_incomplete(&self) -> Result<Vec<PublicationRecord<E>>, StoreError>;

    /// Incomplete records published strictly before `instant`, oldest first.
    fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<PublicationRecord<E>>, StoreError>;

    /// The oldest incomplete record for this event and target, if any.
    fn find_by_event_and_target(
        &self,
        event: &E,
        target: &TargetIdentifier,
    ) -> Result<Option<PublicationRecord<E>>, StoreError>;

    /// Completed records. Always empty under [`CompletionMode::Delete`].
    fn find_completed(&self) -> Result<Vec<PublicationRecord<E>>, StoreError>;

    /// Remove live records by id. Returns how many were removed.
    fn delete_by_identifiers(&self, ids: &[PublicationId]) -> Result<usize, StoreError>;

    /// Purge all completed records.
    fn delete_completed(&self) -> Result<usize, StoreError>;

    /// Purge completed records whose completion date is before `instant`.
    fn delete_completed_before(&self, instant: DateTime<Utc>) -> Result<usize, StoreError>;
}

impl<E: Event, S: PublicationStore<E> + ?Sized> PublicationStore<E> for std::sync::Arc<S> {
    fn completion_mode(&self) -> CompletionMode {
        (**self).completion_mode()
    }

    fn create(&self, record: PublicationRecord<E>) -> Result<PublicationRecord<E>, StoreError> {
        (**self).create(record)
    }

    fn mark_completed(
        &self,
        event: &E,
        target: &TargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).mark_completed(event, target, at)
    }

    fn mark_completed_by_id(
        &self,
        id: PublicationId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).mark_completed_by_id(id, at)
    }

    fn record_failure(&self, id: PublicationId, attempt: FailedAttempt) -> Result<(), StoreError> {
        (**self).record_failure(id, attempt)
    }

    fn find_incomplete(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        (**self).find_incomplete()
    }

    fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        (**self).find_incomplete_published_before(instant)
    }

    fn find_by_event_and_target(
        &self,
        event: &E,
        target: &TargetIdentifier,
    ) -> Result<Option<PublicationRecord<E>>, StoreError> {
        (**self).find_by_event_and_target(event, target)
    }

    fn find_completed(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        (**self).find_completed()
    }

    fn delete_by_identifiers(&self, ids: &[PublicationId]) -> Result<usize, StoreError> {
        (**self).delete_by_identifiers(ids)
    }

    fn delete_completed(&self) -> Result<usize, StoreError> {
        (**self).delete_completed()
    }

    fn delete_completed_before(&self, instant: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).delete_completed_before(instant)
    }
}
