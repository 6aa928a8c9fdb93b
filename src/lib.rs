//! Durable event publication registry.
//!
//! Every event published to in-process targets is recorded once per target
//! before delivery. Records stay incomplete until their target succeeds, so
//! deliveries that fail (or never ran because the process died) can be
//! resubmitted later.

mod clock;
mod config;
mod dispatch;
mod error;
mod event;
mod externalize;
mod lock;
mod publication;
mod recovery;
mod registry;
mod serializer;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    parse_duration, ConfigError, EventsConfig, RecoveryConfig, RepublishConfig,
    SchemaInitialization, StoreConfig, DEFAULT_LOCK_TIMEOUT,
};
pub use dispatch::{
    DeliveryFailure, DispatchReport, EventPublisher, HandlerError, PublishError, Targets,
    UnitOfWork,
};
pub use error::StoreError;
pub use event::{Event, InstanceId, Published};
pub use externalize::{
    BrokerError, BrokerSender, Expression, ExpressionContext, ExpressionError,
    ExternalMessage, ExternalizationError, ExternalizationRules, Externalizer, InMemoryBroker,
    Route, RoutingTarget, SendHandle, TaskSpawner, ThreadSpawner,
};
pub use lock::{
    InMemoryLockProvider, Lease, LeaseGuard, LockError, LockProvider, DEFAULT_LEASE_TTL,
};
pub use publication::{
    CompletionMode, FailedAttempt, PublicationId, PublicationRecord, TargetIdentifier,
    UnknownCompletionMode,
};
pub use recovery::{
    RecoveryError, RecoveryOutcome, RecoveryProcessor, ResubmissionStats, ResubmissionThread,
    Resubmitter,
};
pub use registry::{filters, InFlightPublications, ProcessingSummary, PublicationRegistry};
pub use serializer::{
    BitcodeEventSerializer, EventSerializer, JsonEventSerializer, SerializationError,
};
pub use store::{
    content_hash, InMemoryDatabase, InMemoryPublicationStore, PublicationRow, PublicationStore,
    ARCHIVE_TABLE, PUBLICATION_TABLE,
};
