//! Publication Registry - creates publication records for a fan-out of
//! targets and tracks completion.
//!
//! The registry keeps an in-memory index of in-flight publications keyed by
//! event *instance* and target. That index answers "which publication belongs
//! to this exact event object?" before commit, which the store's content-hash
//! lookup cannot do for value-equal events.
//!
//! ## Example
//!
//! ```ignore
//! let registry = PublicationRegistry::new(store);
//! let event = Published::new(OrderPlaced { id: 1 });
//!
//! registry.store(&event, vec!["inventory".into(), "billing".into()])?;
//! // ... deliver ...
//! registry.mark_completed_for(&event, &"inventory".into(), Utc::now())?;
//! ```

pub mod filters;
mod in_flight;
mod registry;

pub use in_flight::InFlightPublications;
pub use registry::{ProcessingSummary, PublicationRegistry};
