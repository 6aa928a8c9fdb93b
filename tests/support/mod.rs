//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use publication_registry::{
    CompletionMode, Event, HandlerError, InMemoryDatabase, InMemoryPublicationStore,
    PublicationRecord,
};
use serde::{Deserialize, Serialize};

/// Account events used across the suites.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    Opened { account: String, owner: String },
    Deposited { account: String, amount: u64 },
    Closed { account: String },
}

impl Event for AccountEvent {
    fn event_type(&self) -> &str {
        match self {
            AccountEvent::Opened { .. } => "AccountOpened",
            AccountEvent::Deposited { .. } => "MoneyDeposited",
            AccountEvent::Closed { .. } => "AccountClosed",
        }
    }
}

pub fn opened(account: &str) -> AccountEvent {
    AccountEvent::Opened {
        account: account.into(),
        owner: "ada".into(),
    }
}

pub fn deposited(account: &str, amount: u64) -> AccountEvent {
    AccountEvent::Deposited {
        account: account.into(),
        amount,
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store over `database` with its schema created.
pub fn store(
    database: &InMemoryDatabase,
    mode: CompletionMode,
) -> InMemoryPublicationStore {
    let store = InMemoryPublicationStore::json(database.clone()).with_completion_mode(mode);
    store.initialize_schema().unwrap();
    store
}

/// Records every event it receives and fails while switched to failing.
#[derive(Clone, Default)]
pub struct RecordingTarget {
    received: Arc<Mutex<Vec<AccountEvent>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let target = Self::default();
        target.set_failing(true);
        target
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn received(&self) -> Vec<AccountEvent> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn handle(&self, event: &AccountEvent) -> Result<(), HandlerError> {
        if *self.failing.lock().unwrap() {
            return Err(HandlerError::Rejected("target is down".into()));
        }
        self.received.lock().unwrap().push(event.clone());
        Ok(())
    }

    pub fn handler(&self) -> impl Fn(&AccountEvent) -> Result<(), HandlerError> + Send + Sync + 'static {
        let target = self.clone();
        move |event: &AccountEvent| target.handle(event)
    }
}

pub fn targets_of(records: &[PublicationRecord<AccountEvent>]) -> Vec<String> {
    records.iter().map(|r| r.target().to_string()).collect()
}
