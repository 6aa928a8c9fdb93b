use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A domain event that can be durably published.
///
/// `event_type` is the discriminator persisted next to the serialized payload.
/// Applications usually implement this for a single enum of domain events.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn event_type(&self) -> &str;
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one published event instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An event instance as it travels through a unit of work.
///
/// Two `Published` values created from value-equal events are still distinct
/// instances. Cloning keeps the instance id, so a clone refers to the same
/// in-flight publications as the original.
pub struct Published<E> {
    instance: InstanceId,
    event: Arc<E>,
}

impl<E> Published<E> {
    pub fn new(event: E) -> Self {
        Self::from_arc(Arc::new(event))
    }

    pub fn from_arc(event: Arc<E>) -> Self {
        Published {
            instance: InstanceId::next(),
            event,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn shared(&self) -> Arc<E> {
        Arc::clone(&self.event)
    }

    /// Identity comparison. Value equality of the events is irrelevant here.
    pub fn same_instance(&self, other: &Published<E>) -> bool {
        self.instance == other.instance
    }
}

impl<E> Clone for Published<E> {
    fn clone(&self) -> Self {
        Published {
            instance: self.instance,
            event: Arc::clone(&self.event),
        }
    }
}

impl<E> Deref for Published<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.event
    }
}

impl<E: fmt::Debug> fmt::Debug for Published<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Published")
            .field("instance", &self.instance)
            .field("event", &self.event)
            .finish()
    }
}
