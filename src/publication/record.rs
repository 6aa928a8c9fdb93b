use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Stable identifier of a publication record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicationId(Uuid);

impl PublicationId {
    pub fn new() -> Self {
        PublicationId(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        PublicationId(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PublicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies a logical consumer of events. Must be stable across restarts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentifier(String);

impl TargetIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        TargetIdentifier(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetIdentifier {
    fn from(value: &str) -> Self {
        TargetIdentifier(value.to_string())
    }
}

impl From<String> for TargetIdentifier {
    fn from(value: String) -> Self {
        TargetIdentifier(value)
    }
}

/// A failed delivery attempt. Diagnostic only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub failed_at: DateTime<Utc>,
    pub reason: String,
}

impl FailedAttempt {
    pub fn new(failed_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        FailedAttempt {
            failed_at,
            reason: reason.into(),
        }
    }
}

/// One delivery obligation: an event for a single target.
///
/// Only two mutations exist after creation: appending a failed attempt and
/// setting the completion date, which happens at most once.
#[derive(Debug)]
pub struct PublicationRecord<E> {
    id: PublicationId,
    event: Arc<E>,
    event_type: String,
    target: TargetIdentifier,
    publication_date: DateTime<Utc>,
    completion_date: Option<DateTime<Utc>>,
    failed_attempts: Vec<FailedAttempt>,
}

impl<E: Event> PublicationRecord<E> {
    /// A fresh, incomplete record with a newly assigned id.
    pub fn new(event: Arc<E>, target: TargetIdentifier, publication_date: DateTime<Utc>) -> Self {
        let event_type = event.event_type().to_string();
        PublicationRecord {
            id: PublicationId::new(),
            event,
            event_type,
            target,
            publication_date,
            completion_date: None,
            failed_attempts: Vec::new(),
        }
    }
}

impl<E> PublicationRecord<E> {
    /// Rebuild a record read back from storage.
    pub fn restore(
        id: PublicationId,
        event: E,
        event_type: impl Into<String>,
        target: TargetIdentifier,
        publication_date: DateTime<Utc>,
        completion_date: Option<DateTime<Utc>>,
        failed_attempts: Vec<FailedAttempt>,
    ) -> Self {
        PublicationRecord {
            id,
            event: Arc::new(event),
            event_type: event_type.into(),
            target,
            publication_date,
            completion_date,
            failed_attempts,
        }
    }

    pub fn id(&self) -> PublicationId {
        self.id
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn shared_event(&self) -> Arc<E> {
        Arc::clone(&self.event)
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn target(&self) -> &TargetIdentifier {
        &self.target
    }

    pub fn publication_date(&self) -> DateTime<Utc> {
        self.publication_date
    }

    pub fn completion_date(&self) -> Option<DateTime<Utc>> {
        self.completion_date
    }

    pub fn failed_attempts(&self) -> &[FailedAttempt] {
        &self.failed_attempts
    }

    pub fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }

    /// Set the completion date. Returns `false` if the record was already
    /// completed, in which case nothing changes.
    pub fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if self.completion_date.is_some() {
            return false;
        }
        self.completion_date = Some(at);
        true
    }

    pub fn record_failure(&mut self, attempt: FailedAttempt) {
        self.failed_attempts.push(attempt);
    }
}

impl<E> Clone for PublicationRecord<E> {
    fn clone(&self) -> Self {
        PublicationRecord {
            id: self.id,
            event: Arc::clone(&self.event),
            event_type: self.event_type.clone(),
            target: self.target.clone(),
            publication_date: self.publication_date,
            completion_date: self.completion_date,
            failed_attempts: self.failed_attempts.clone(),
        }
    }
}
