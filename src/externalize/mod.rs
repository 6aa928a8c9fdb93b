//! Sending events to external brokers.
//!
//! An [`Externalizer`] is an ordinary delivery target: register its
//! [`handler`](Externalizer::handler) in the target table and externalized
//! events get the same publication bookkeeping as in-process targets.
//!
//! Each destination is drained by its own loop. [`ThreadSpawner`] runs those
//! loops on dedicated threads; brokers tied to an async runtime can supply a
//! [`TaskSpawner`] for it.

mod broker;
mod expression;
mod externalizer;
mod routing;
mod spawner;

pub use broker::{BrokerError, BrokerSender, ExternalMessage, InMemoryBroker};
pub use expression::{Expression, ExpressionContext, ExpressionError};
pub use externalizer::{ExternalizationError, ExternalizationRules, Externalizer, SendHandle};
pub use routing::{Route, RoutingTarget};
pub use spawner::{TaskSpawner, ThreadSpawner};
