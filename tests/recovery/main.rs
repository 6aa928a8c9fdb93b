#[path = "../support/mod.rs"]
mod support;

use std::collections::HashSet;
use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use publication_registry::{
    CompletionMode, EventPublisher, EventsConfig, InMemoryDatabase, InMemoryLockProvider,
    InMemoryPublicationStore, LockProvider, PublicationRegistry, RecoveryOutcome,
    RecoveryProcessor, ResubmissionThread, Targets,
};

use support::{deposited, store, AccountEvent, RecordingTarget};

type Publisher = EventPublisher<AccountEvent, InMemoryPublicationStore>;

fn publisher(database: &InMemoryDatabase, ledger: &RecordingTarget) -> Publisher {
    EventPublisher::new(
        PublicationRegistry::new(store(database, CompletionMode::Update)),
        Targets::new().target("ledger", ledger.handler()),
    )
}

/// Leave `count` incomplete publications behind, as a crashed or failing
/// instance would.
fn seed_backlog(database: &InMemoryDatabase, count: u64) {
    let down = RecordingTarget::failing();
    let publisher = publisher(database, &down);
    for amount in 1..=count {
        publisher.publish(deposited("acc-1", amount)).unwrap();
    }
    assert_eq!(publisher.registry().find_incomplete().unwrap().len(), count as usize);
}

#[test]
fn restarted_instance_redelivers_backlog() {
    support::init_tracing();
    let database = InMemoryDatabase::new();
    seed_backlog(&database, 3);

    let ledger = RecordingTarget::new();
    let restarted = publisher(&database, &ledger);
    let config = EventsConfig::from_properties([("events.republish-on-restart", "true")]).unwrap();
    let processor =
        RecoveryProcessor::from_config(&config.recovery_config(), Arc::new(InMemoryLockProvider::new()));

    let outcome = processor.run(&restarted).unwrap();

    assert!(matches!(outcome, RecoveryOutcome::Resubmitted(s) if s.completed == 3));
    assert_eq!(
        ledger.received(),
        vec![deposited("acc-1", 1), deposited("acc-1", 2), deposited("acc-1", 3)]
    );
    assert!(restarted.registry().find_incomplete().unwrap().is_empty());
}

#[test]
fn disabled_recovery_leaves_backlog_alone() {
    let database = InMemoryDatabase::new();
    seed_backlog(&database, 2);

    let ledger = RecordingTarget::new();
    let restarted = publisher(&database, &ledger);
    let config = EventsConfig::default();
    let processor =
        RecoveryProcessor::from_config(&config.recovery_config(), Arc::new(InMemoryLockProvider::new()));

    assert_eq!(processor.run(&restarted).unwrap(), RecoveryOutcome::Disabled);
    assert_eq!(ledger.count(), 0);
}

/// Delivery log shared by several instances, counting per event.
#[derive(Clone, Default)]
struct SlowLedger {
    delivered: Arc<Mutex<Vec<AccountEvent>>>,
}

impl SlowLedger {
    fn publisher(&self, database: &InMemoryDatabase) -> Publisher {
        let delivered = self.delivered.clone();
        EventPublisher::new(
            PublicationRegistry::new(store(database, CompletionMode::Update)),
            Targets::new().target("ledger", move |event: &AccountEvent| {
                thread::sleep(Duration::from_millis(10));
                delivered.lock().unwrap().push(event.clone());
                Ok(())
            }),
        )
    }
}

#[test]
fn exclusive_recovery_never_resubmits_twice() {
    let database = InMemoryDatabase::new();
    seed_backlog(&database, 5);

    let ledger = SlowLedger::default();
    let provider: Arc<dyn LockProvider> = Arc::new(InMemoryLockProvider::new());
    let barrier = Arc::new(Barrier::new(2));

    let instances: Vec<_> = (0..2)
        .map(|_| {
            let publisher = ledger.publisher(&database);
            let provider = provider.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let processor =
                    RecoveryProcessor::exclusive(provider, "event-recovery", Duration::from_secs(5));
                barrier.wait();
                processor.run(&publisher).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = instances.into_iter().map(|h| h.join().unwrap()).collect();

    let completed: usize = outcomes
        .iter()
        .map(|outcome| match outcome {
            RecoveryOutcome::Resubmitted(summary) => summary.completed,
            _ => 0,
        })
        .sum();
    assert_eq!(completed, 5);

    let delivered = ledger.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 5);
    let distinct: HashSet<_> = delivered.iter().map(|e| format!("{e:?}")).collect();
    assert_eq!(distinct.len(), 5);
}

#[test]
fn renewed_lease_outlives_a_backlog_slower_than_its_lifetime() {
    let database = InMemoryDatabase::new();
    // ten deliveries of 10ms each against a 50ms lease
    seed_backlog(&database, 10);

    let config = EventsConfig::from_properties([
        ("events.republish-on-restart", "true"),
        ("events.republish-on-restart.lock-name", "event-recovery"),
        ("events.republish-on-restart.lock-timeout", "5s"),
        ("events.republish-on-restart.lease-ttl", "50ms"),
    ])
    .unwrap();
    let recovery = config.recovery_config();
    let provider: Arc<dyn LockProvider> = Arc::new(InMemoryLockProvider::from_config(&recovery));

    let ledger = SlowLedger::default();
    let barrier = Arc::new(Barrier::new(2));
    let instances: Vec<_> = (0..2)
        .map(|_| {
            let publisher = ledger.publisher(&database);
            let processor = RecoveryProcessor::from_config(&recovery, provider.clone());
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                processor.run(&publisher).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = instances.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, RecoveryOutcome::Resubmitted(_))));
    let delivered = ledger.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 10);
    let distinct: HashSet<_> = delivered.iter().map(|e| format!("{e:?}")).collect();
    assert_eq!(distinct.len(), 10);
}

#[test]
fn exclusive_recovery_skips_while_another_instance_runs() {
    let database = InMemoryDatabase::new();
    seed_backlog(&database, 2);
    let provider: Arc<dyn LockProvider> = Arc::new(InMemoryLockProvider::new());

    let (entered_tx, entered_rx) = channel();
    let (go_tx, go_rx) = channel::<()>();
    let gate = Arc::new(Mutex::new(Some((entered_tx, go_rx))));
    let delivered = Arc::new(Mutex::new(0));

    let running = {
        let delivered = delivered.clone();
        let blocking = EventPublisher::new(
            PublicationRegistry::new(store(&database, CompletionMode::Update)),
            Targets::new().target("ledger", move |_: &AccountEvent| {
                // first delivery holds the lock open until the test says go
                if let Some((entered, go)) = gate.lock().unwrap().take() {
                    entered.send(()).unwrap();
                    go.recv().unwrap();
                }
                *delivered.lock().unwrap() += 1;
                Ok(())
            }),
        );
        let provider = provider.clone();
        thread::spawn(move || {
            RecoveryProcessor::exclusive(provider, "event-recovery", Duration::ZERO)
                .run(&blocking)
                .unwrap()
        })
    };

    entered_rx.recv().unwrap();
    let idle = RecordingTarget::new();
    let second = publisher(&database, &idle);
    let outcome = RecoveryProcessor::exclusive(provider.clone(), "event-recovery", Duration::ZERO)
        .run(&second)
        .unwrap();
    go_tx.send(()).unwrap();

    assert_eq!(
        outcome,
        RecoveryOutcome::LockNotAcquired {
            lock_name: "event-recovery".into()
        }
    );
    assert!(matches!(running.join().unwrap(), RecoveryOutcome::Resubmitted(s) if s.completed == 2));
    assert_eq!(*delivered.lock().unwrap(), 2);
    assert_eq!(idle.count(), 0);
}

#[test]
fn resubmission_thread_drains_backlog_once_target_recovers() {
    let database = InMemoryDatabase::new();
    let ledger = RecordingTarget::failing();
    let publisher = publisher(&database, &ledger);
    publisher.publish(deposited("acc-1", 1)).unwrap();
    publisher.publish(deposited("acc-1", 2)).unwrap();

    let worker = ResubmissionThread::spawn(publisher.clone(), Duration::from_millis(10), Duration::ZERO);
    thread::sleep(Duration::from_millis(30));
    ledger.set_failing(false);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !publisher.registry().find_incomplete().unwrap().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let stats = worker.stop();

    assert!(publisher.registry().find_incomplete().unwrap().is_empty());
    assert_eq!(stats.completed, 2);
    assert!(stats.failed >= 2);
    assert_eq!(ledger.count(), 2);
}
