use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatch::HandlerError;
use crate::event::Event;
use crate::serializer::{EventSerializer, SerializationError};

use super::broker::{BrokerError, BrokerSender, ExternalMessage};
use super::expression::{ExpressionContext, ExpressionError};
use super::routing::{Route, RoutingTarget};
use super::spawner::{TaskSpawner, ThreadSpawner};

#[derive(Debug, Error)]
pub enum ExternalizationError {
    #[error("no externalization route for event type `{0}`")]
    Unsupported(String),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Which event types leave the process, and where to.
#[derive(Debug, Clone, Default)]
pub struct ExternalizationRules {
    routes: HashMap<String, RoutingTarget>,
}

impl ExternalizationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `event_type` to a `<destination>::<key-expression>` target.
    pub fn route(self, event_type: impl Into<String>, target: &str) -> Result<Self, ExpressionError> {
        Ok(self.with_target(event_type, RoutingTarget::parse(target)?))
    }

    pub fn with_target(mut self, event_type: impl Into<String>, target: RoutingTarget) -> Self {
        self.routes.insert(event_type.into(), target);
        self
    }

    pub fn target_for(&self, event_type: &str) -> Option<&RoutingTarget> {
        self.routes.get(event_type)
    }

    pub fn supports(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }
}

type SendResult = Result<(), BrokerError>;

struct Queued {
    message: ExternalMessage,
    done: oneshot::Sender<SendResult>,
}

/// Completion of one externalized send.
///
/// The send is queued as soon as the handle exists. Dropping the handle only
/// discards the outcome; the message is still delivered.
pub struct SendHandle {
    route: Route,
    done: oneshot::Receiver<SendResult>,
}

impl SendHandle {
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Block the current thread until the send finished.
    pub fn wait(self) -> SendResult {
        futures::executor::block_on(self)
    }
}

impl Future for SendHandle {
    type Output = SendResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(BrokerError::Unavailable(format!(
                "worker for `{}` stopped before sending",
                self.route.destination
            )))),
        }
    }
}

/// Serializes events and sends them to an external broker.
///
/// Each destination has one queue drained by one loop, started through the
/// [`TaskSpawner`] on first use. Sends to the same destination therefore
/// never overlap and keep their order, while different destinations proceed
/// independently.
pub struct Externalizer<E, S, B> {
    rules: ExternalizationRules,
    serializer: S,
    broker: Arc<B>,
    context: ExpressionContext,
    spawner: Arc<dyn TaskSpawner>,
    lanes: DashMap<String, mpsc::UnboundedSender<Queued>>,
    _event: PhantomData<fn(&E)>,
}

impl<E, S, B> Externalizer<E, S, B>
where
    E: Event,
    S: EventSerializer + 'static,
    B: BrokerSender + 'static,
{
    pub fn new(rules: ExternalizationRules, serializer: S, broker: B) -> Self {
        Externalizer {
            rules,
            serializer,
            broker: Arc::new(broker),
            context: ExpressionContext::new(),
            spawner: Arc::new(ThreadSpawner),
            lanes: DashMap::new(),
            _event: PhantomData,
        }
    }

    pub fn with_context(mut self, context: ExpressionContext) -> Self {
        self.context = context;
        self
    }

    /// Run destination loops on `spawner` instead of dedicated threads.
    pub fn with_spawner(mut self, spawner: impl TaskSpawner + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    pub fn rules(&self) -> &ExternalizationRules {
        &self.rules
    }

    pub fn supports(&self, event: &E) -> bool {
        self.rules.supports(event.event_type())
    }

    /// Route and serialize `event`, then queue its send behind earlier sends
    /// to the same destination.
    pub fn externalize(&self, event: &E) -> Result<SendHandle, ExternalizationError> {
        let event_type = event.event_type();
        let target = self
            .rules
            .target_for(event_type)
            .ok_or_else(|| ExternalizationError::Unsupported(event_type.to_string()))?;

        let json = serde_json::to_value(event)
            .map_err(|e| SerializationError::Encode(e.to_string()))?;
        let route = target.resolve(&json, &self.context)?;
        let payload = self.serializer.serialize(event)?;

        let message = ExternalMessage {
            destination: route.destination.clone(),
            key: route.key.clone(),
            event_type: event_type.to_string(),
            payload,
        };

        let (done, receiver) = oneshot::channel();
        self.enqueue(&route.destination, Queued { message, done });

        debug!(
            event_type,
            destination = %route.destination,
            key = ?route.key,
            "event queued for externalization"
        );
        Ok(SendHandle { route, done: receiver })
    }

    /// Adapt into a delivery target handler that waits for each send.
    ///
    /// The handler blocks its thread, so a spawner driving destination loops
    /// on that same thread would never make progress.
    pub fn handler(self: &Arc<Self>) -> impl Fn(&E) -> Result<(), HandlerError> + Send + Sync + 'static {
        let externalizer = Arc::clone(self);
        move |event: &E| {
            let handle = externalizer.externalize(event).map_err(HandlerError::other)?;
            handle
                .wait()
                .map_err(|err| HandlerError::other(ExternalizationError::Broker(err)))
        }
    }

    fn enqueue(&self, destination: &str, queued: Queued) {
        let mut lane = self
            .lanes
            .entry(destination.to_string())
            .or_insert_with(|| self.open_lane(destination));

        let Err(refused) = lane.unbounded_send(queued) else {
            return;
        };
        warn!(destination, "destination worker stopped, starting a new one");
        *lane = self.open_lane(destination);
        // a second refusal drops the message, failing its handle
        let _ = lane.unbounded_send(refused.into_inner());
    }

    fn open_lane(&self, destination: &str) -> mpsc::UnboundedSender<Queued> {
        let (sender, queue) = mpsc::unbounded();
        self.spawner
            .spawn(destination, drain(Arc::clone(&self.broker), queue).boxed());
        debug!(destination, "destination worker started");
        sender
    }
}

async fn drain<B: BrokerSender>(broker: Arc<B>, mut queue: mpsc::UnboundedReceiver<Queued>) {
    while let Some(Queued { message, done }) = queue.next().await {
        let result = broker.send(message).await;
        // nobody may be waiting for this outcome
        let _ = done.send(result);
    }
}
