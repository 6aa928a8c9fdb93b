use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

/// A serialized event on its way to an external destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalMessage {
    pub destination: String,
    pub key: Option<String>,
    pub event_type: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("destination `{destination}` rejected the message: {reason}")]
    Rejected { destination: String, reason: String },
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous send to a message broker.
///
/// The returned future completes once the broker has acknowledged (or
/// refused) the message. The externalizer polls one send per destination at
/// a time, from that destination's loop.
pub trait BrokerSender: Send + Sync {
    fn send(&self, message: ExternalMessage) -> BoxFuture<'static, Result<(), BrokerError>>;
}

impl<B: BrokerSender + ?Sized> BrokerSender for Arc<B> {
    fn send(&self, message: ExternalMessage) -> BoxFuture<'static, Result<(), BrokerError>> {
        (**self).send(message)
    }
}

/// In-memory broker for testing and single-process scenarios.
///
/// Clones share the same message log. Destinations can be marked as
/// rejecting to simulate a broker refusing messages.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    log: Arc<RwLock<Vec<ExternalMessage>>>,
    rejecting: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every message sent to `destination` from now on.
    pub fn reject(&self, destination: impl Into<String>) {
        if let Ok(mut rejecting) = self.rejecting.write() {
            rejecting.insert(destination.into());
        }
    }

    /// Accept messages for `destination` again.
    pub fn accept(&self, destination: &str) {
        if let Ok(mut rejecting) = self.rejecting.write() {
            rejecting.remove(destination);
        }
    }

    /// All accepted messages, in acceptance order.
    pub fn messages(&self) -> Vec<ExternalMessage> {
        self.log.read().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn messages_for(&self, destination: &str) -> Vec<ExternalMessage> {
        self.messages()
            .into_iter()
            .filter(|message| message.destination == destination)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BrokerSender for InMemoryBroker {
    fn send(&self, message: ExternalMessage) -> BoxFuture<'static, Result<(), BrokerError>> {
        let log = Arc::clone(&self.log);
        let rejecting = Arc::clone(&self.rejecting);

        future::lazy(move |_| {
            let refused = rejecting
                .read()
                .map_err(|_| BrokerError::Unavailable("rejection table poisoned".into()))?
                .contains(&message.destination);
            if refused {
                return Err(BrokerError::Rejected {
                    destination: message.destination,
                    reason: "destination is rejecting messages".into(),
                });
            }
            log.write()
                .map_err(|_| BrokerError::Unavailable("message log poisoned".into()))?
                .push(message);
            Ok(())
        })
        .boxed()
    }
}
