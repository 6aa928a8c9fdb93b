use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::event::Event;
use crate::publication::TargetIdentifier;

use super::error::HandlerError;

type Handler<E> = Arc<dyn Fn(&E) -> Result<(), HandlerError> + Send + Sync>;

struct Registration<E> {
    event_types: Option<HashSet<String>>,
    handler: Handler<E>,
}

impl<E: Event> Registration<E> {
    fn accepts(&self, event: &E) -> bool {
        self.event_types
            .as_ref()
            .map_or(true, |types| types.contains(event.event_type()))
    }
}

/// Registration table of delivery targets.
///
/// Built once at startup. Maps stable target identifiers to handler closures,
/// optionally restricted to a set of event types. Target resolution follows
/// registration order.
///
/// ## Example
///
/// ```ignore
/// let targets = Targets::new()
///     .target("billing.on-order", |event: &OrderEvent| billing.apply(event))
///     .target_for("mailer.on-placed", &["OrderPlaced"], |event| mailer.send(event));
/// ```
pub struct Targets<E> {
    order: Vec<TargetIdentifier>,
    registrations: HashMap<TargetIdentifier, Registration<E>>,
}

impl<E: Event> Targets<E> {
    pub fn new() -> Self {
        Targets {
            order: Vec::new(),
            registrations: HashMap::new(),
        }
    }

    /// Register a target that receives every event.
    ///
    /// Registering an identifier twice replaces the earlier handler.
    pub fn target<F>(self, id: impl Into<TargetIdentifier>, handler: F) -> Self
    where
        F: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(id.into(), None, Arc::new(handler))
    }

    /// Register a target that only receives the given event types.
    pub fn target_for<F>(self, id: impl Into<TargetIdentifier>, event_types: &[&str], handler: F) -> Self
    where
        F: Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let types = event_types.iter().map(|t| t.to_string()).collect();
        self.register(id.into(), Some(types), Arc::new(handler))
    }

    fn register(
        mut self,
        id: TargetIdentifier,
        event_types: Option<HashSet<String>>,
        handler: Handler<E>,
    ) -> Self {
        let registration = Registration { event_types, handler };
        if self.registrations.insert(id.clone(), registration).is_none() {
            self.order.push(id);
        }
        self
    }

    /// Targets interested in `event`, in registration order.
    pub fn resolve(&self, event: &E) -> Vec<TargetIdentifier> {
        self.order
            .iter()
            .filter(|id| {
                self.registrations
                    .get(*id)
                    .is_some_and(|registration| registration.accepts(event))
            })
            .cloned()
            .collect()
    }

    /// Run the handler registered under `target`.
    pub fn invoke(&self, target: &TargetIdentifier, event: &E) -> Result<(), HandlerError> {
        let registration = self
            .registrations
            .get(target)
            .ok_or_else(|| HandlerError::UnknownTarget(target.clone()))?;
        (registration.handler)(event)
    }

    pub fn contains(&self, target: &TargetIdentifier) -> bool {
        self.registrations.contains_key(target)
    }

    pub fn identifiers(&self) -> &[TargetIdentifier] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<E: Event> Default for Targets<E> {
    fn default() -> Self {
        Self::new()
    }
}
