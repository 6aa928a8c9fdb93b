//! The durable unit of work: one event instance for one target.

mod completion;
mod record;

pub use completion::{CompletionMode, UnknownCompletionMode};
pub use record::{FailedAttempt, PublicationId, PublicationRecord, TargetIdentifier};
