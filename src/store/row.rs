use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::publication::FailedAttempt;

/// The persisted shape of a publication record.
///
/// Mirrors the relational layout (`id`, `publication_date`, `listener_id`,
/// `serialized_event`, `event_type`, `completion_date`) plus the content hash
/// used for cross-process matching and the failure log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRow {
    pub id: Uuid,
    pub publication_date: DateTime<Utc>,
    pub listener_id: String,
    pub serialized_event: String,
    pub event_type: String,
    pub event_hash: String,
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_attempts: Vec<FailedAttempt>,
}

impl PublicationRow {
    pub fn is_completed(&self) -> bool {
        self.completion_date.is_some()
    }

    pub(crate) fn matches(&self, event_hash: &str, serialized_event: &str, listener_id: &str) -> bool {
        self.completion_date.is_none()
            && self.listener_id == listener_id
            && self.event_hash == event_hash
            && self.serialized_event == serialized_event
    }
}

/// SHA-256 hex digest of a serialized event.
pub fn content_hash(serialized_event: &str) -> String {
    let hash = Sha256::digest(serialized_event.as_bytes());
    format!("{hash:x}")
}
