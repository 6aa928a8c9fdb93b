use dashmap::DashMap;

use crate::event::InstanceId;
use crate::publication::{PublicationId, PublicationRecord, TargetIdentifier};

type InFlightKey = (InstanceId, TargetIdentifier);

/// Process-local index of publications that are between creation and
/// completion (or failure).
///
/// Keyed by event *instance* and target, so two value-equal events published
/// back to back resolve to their own publications. Sharded maps keep
/// operations on different keys from contending.
pub struct InFlightPublications<E> {
    entries: DashMap<InFlightKey, PublicationRecord<E>>,
    keys: DashMap<PublicationId, InFlightKey>,
}

impl<E> InFlightPublications<E> {
    pub fn new() -> Self {
        InFlightPublications {
            entries: DashMap::new(),
            keys: DashMap::new(),
        }
    }

    pub fn register(&self, instance: InstanceId, record: PublicationRecord<E>) {
        let key = (instance, record.target().clone());
        let id = record.id();
        if let Some(replaced) = self.entries.insert(key.clone(), record) {
            self.keys.remove(&replaced.id());
        }
        self.keys.insert(id, key);
    }

    pub fn find(&self, instance: InstanceId, target: &TargetIdentifier) -> Option<PublicationRecord<E>> {
        self.entries
            .get(&(instance, target.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Drop the entry for a publication. Returns whether one existed.
    pub fn remove(&self, id: PublicationId) -> bool {
        match self.keys.remove(&id) {
            Some((_, key)) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, id: PublicationId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for InFlightPublications<E> {
    fn default() -> Self {
        Self::new()
    }
}
