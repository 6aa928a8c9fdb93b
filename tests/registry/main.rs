#[path = "../support/mod.rs"]
mod support;

use chrono::Utc;
use publication_registry::{
    filters, CompletionMode, Event, EventPublisher, HandlerError, InMemoryDatabase,
    PublicationRegistry, PublishError, Published, StoreError, TargetIdentifier, Targets,
    PUBLICATION_TABLE,
};
use serde::{Deserialize, Serialize, Serializer};

use support::{deposited, opened, store, targets_of, AccountEvent, RecordingTarget};

fn target(name: &str) -> TargetIdentifier {
    TargetIdentifier::from(name)
}

// --- Identity and content matching ---

#[test]
fn value_equal_events_resolve_to_their_own_publications() {
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));

    let e1 = Published::new(deposited("acc-1", 10));
    let e1_prime = Published::new(deposited("acc-1", 10));
    let first = registry.store(&e1, vec![target("A")]).unwrap();
    let second = registry.store(&e1_prime, vec![target("A")]).unwrap();

    // content lookup cannot tell them apart: the oldest match wins
    let by_content = registry
        .find_by_event_and_target(e1.event(), &target("A"))
        .unwrap()
        .unwrap();
    assert_eq!(by_content.id(), first[0].id());

    // completing by instance touches exactly the publication of e1
    assert!(registry
        .mark_completed_for(&e1, &target("A"), Utc::now())
        .unwrap());

    let incomplete = registry.find_incomplete().unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].id(), second[0].id());
}

#[test]
fn completing_the_later_instance_leaves_the_earlier_one_incomplete() {
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));

    let e1 = Published::new(deposited("acc-1", 10));
    let e1_prime = Published::new(deposited("acc-1", 10));
    let first = registry.store(&e1, vec![target("A")]).unwrap();
    registry.store(&e1_prime, vec![target("A")]).unwrap();

    registry
        .mark_completed_for(&e1_prime, &target("A"), Utc::now())
        .unwrap();

    let incomplete = registry.find_incomplete().unwrap();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].id(), first[0].id());
}

#[test]
fn completion_is_idempotent() {
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));
    let event = Published::new(opened("acc-1"));
    let records = registry.store(&event, vec![target("A")]).unwrap();
    let at = Utc::now();

    registry.mark_completed(&records[0], at).unwrap();
    let once = database.rows(PUBLICATION_TABLE).unwrap();
    registry.mark_completed(&records[0], at).unwrap();
    assert!(!registry.mark_completed_for(&event, &target("A"), at).unwrap());
    let twice = database.rows(PUBLICATION_TABLE).unwrap();

    assert_eq!(once, twice);
}

#[test]
fn another_process_completes_by_content() {
    let database = InMemoryDatabase::new();
    let here = PublicationRegistry::new(store(&database, CompletionMode::Update));
    let there = PublicationRegistry::new(store(&database, CompletionMode::Update));

    let event = Published::new(opened("acc-1"));
    here.store(&event, vec![target("A"), target("B")]).unwrap();

    // no in-flight entry over there: falls back to the content hash
    let elsewhere = Published::new(opened("acc-1"));
    assert!(there
        .mark_completed_for(&elsewhere, &target("B"), Utc::now())
        .unwrap());

    let incomplete = here.find_incomplete().unwrap();
    assert_eq!(targets_of(&incomplete), vec!["A"]);
}

#[test]
fn failed_publication_leaves_the_in_flight_index() {
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));
    let event = Published::new(opened("acc-1"));
    let records = registry.store(&event, vec![target("A")]).unwrap();
    assert!(registry.find_in_flight(&event, &target("A")).is_some());

    registry
        .mark_failed(&records[0], Utc::now(), "connection reset")
        .unwrap();

    assert!(registry.find_in_flight(&event, &target("A")).is_none());
    assert_eq!(registry.in_flight_count(), 0);
    let incomplete = registry.find_incomplete().unwrap();
    assert_eq!(incomplete[0].failed_attempts()[0].reason, "connection reset");
}

// --- Recovery processing ---

#[test]
fn one_failing_record_does_not_stop_the_backlog() {
    support::init_tracing();
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));
    for amount in 1..=3 {
        let event = Published::new(deposited("acc-1", amount));
        registry.store(&event, vec![target("ledger")]).unwrap();
    }

    let summary = registry
        .process_incomplete(filters::all(), |record| match record.event() {
            AccountEvent::Deposited { amount: 2, .. } => Err(HandlerError::Rejected("bad amount".into())),
            AccountEvent::Deposited { amount: 3, .. } => panic!("ledger crashed"),
            _ => Ok(()),
        })
        .unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 2);

    let incomplete = registry.find_incomplete().unwrap();
    assert_eq!(incomplete.len(), 2);
    assert!(incomplete.iter().all(|r| r.failed_attempts().len() == 1));
}

#[test]
fn retry_budget_filter_skips_exhausted_records() {
    let database = InMemoryDatabase::new();
    let registry = PublicationRegistry::new(store(&database, CompletionMode::Update));
    let event = Published::new(opened("acc-1"));
    let records = registry.store(&event, vec![target("ledger")]).unwrap();
    for _ in 0..3 {
        registry.mark_failed(&records[0], Utc::now(), "down").unwrap();
    }

    let summary = registry
        .process_incomplete(filters::fewer_failures_than(3), |_| Ok(()))
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(registry.find_incomplete().unwrap().len(), 1);
}

// --- Publishing through targets ---

#[test]
fn publisher_records_failures_and_resubmission_completes_them() {
    let database = InMemoryDatabase::new();
    let ledger = RecordingTarget::new();
    let mailer = RecordingTarget::failing();
    let publisher = EventPublisher::new(
        PublicationRegistry::new(store(&database, CompletionMode::Update)),
        Targets::new()
            .target("ledger", ledger.handler())
            .target_for("mailer", &["AccountOpened"], mailer.handler()),
    );

    let report = publisher.publish(opened("acc-1")).unwrap();
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    publisher.publish(deposited("acc-1", 5)).unwrap();
    assert_eq!(ledger.count(), 2);

    mailer.set_failing(false);
    let summary = publisher.resubmit_incomplete().unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(mailer.received(), vec![opened("acc-1")]);
    assert!(publisher.registry().find_incomplete().unwrap().is_empty());
}

#[derive(Debug, Deserialize)]
enum Ledger {
    Entry(u32),
    Poisoned,
}

impl Serialize for Ledger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ledger::Entry(n) => serializer.serialize_newtype_variant("Ledger", 0, "Entry", n),
            Ledger::Poisoned => Err(serde::ser::Error::custom("cannot encode poisoned entry")),
        }
    }
}

impl Event for Ledger {
    fn event_type(&self) -> &str {
        "Ledger"
    }
}

#[test]
fn unit_of_work_is_all_or_nothing_when_an_event_cannot_be_stored() {
    let database = InMemoryDatabase::new();
    let sink = std::sync::Arc::new(std::sync::Mutex::new(0));
    let counter = sink.clone();
    let backend = store(&database, CompletionMode::Update);
    let publisher = EventPublisher::new(
        PublicationRegistry::new(backend),
        Targets::new().target("books", move |_: &Ledger| {
            *counter.lock().unwrap() += 1;
            Ok(())
        }),
    );

    let mut unit = publisher.begin();
    unit.publish(Ledger::Entry(1));
    unit.publish(Ledger::Poisoned);
    let err = unit.commit().unwrap_err();

    assert!(matches!(err, PublishError::Store(StoreError::Serialization(_))));
    assert_eq!(database.row_count(PUBLICATION_TABLE).unwrap(), 0);
    assert_eq!(*sink.lock().unwrap(), 0);
    assert_eq!(publisher.registry().in_flight_count(), 0);
}
