//! Delivery - resolves targets for an event, makes the publications durable
//! and invokes the targets once the unit of work commits.
//!
//! ```text
//! publish(event) ──► UnitOfWork (buffer) ──commit──► registry.store(...)
//!                                                    │
//!                                                    ▼
//!                                   Targets::invoke per publication
//!                                   ├─ Ok  ──► mark_completed
//!                                   └─ Err ──► mark_failed (stays incomplete)
//! ```

mod error;
mod publisher;
mod targets;

pub use error::{HandlerError, PublishError};
pub use publisher::{DeliveryFailure, DispatchReport, EventPublisher, UnitOfWork};
pub use targets::Targets;
