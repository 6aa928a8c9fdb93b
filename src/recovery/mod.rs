//! Startup and scheduled resubmission of incomplete publications.
//!
//! [`RecoveryProcessor`] runs once (typically at startup), either
//! unconditionally or behind a named lock so only one instance of a fleet
//! resubmits. [`ResubmissionThread`] repeats the resubmission on an interval.

mod processor;
mod thread;

pub use processor::{RecoveryError, RecoveryOutcome, RecoveryProcessor, Resubmitter};
pub use thread::{ResubmissionStats, ResubmissionThread};
