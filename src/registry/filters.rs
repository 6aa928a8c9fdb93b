//! Ready-made filters for [`PublicationRegistry::process_incomplete`](super::PublicationRegistry::process_incomplete).

use chrono::{DateTime, Utc};

use crate::publication::{PublicationRecord, TargetIdentifier};

/// Accept every record.
pub fn all<E>() -> impl Fn(&PublicationRecord<E>) -> bool {
    |_: &PublicationRecord<E>| true
}

/// Accept records that have failed fewer than `attempts` times.
pub fn fewer_failures_than<E>(attempts: usize) -> impl Fn(&PublicationRecord<E>) -> bool {
    move |record: &PublicationRecord<E>| record.failed_attempts().len() < attempts
}

/// Accept records published strictly before `instant`.
pub fn published_before<E>(instant: DateTime<Utc>) -> impl Fn(&PublicationRecord<E>) -> bool {
    move |record: &PublicationRecord<E>| record.publication_date() < instant
}

/// Accept records addressed to `target`.
pub fn for_target<E>(target: impl Into<TargetIdentifier>) -> impl Fn(&PublicationRecord<E>) -> bool {
    let target = target.into();
    move |record: &PublicationRecord<E>| record.target() == &target
}
