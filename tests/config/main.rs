#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use publication_registry::{
    CompletionMode, ConfigError, EventsConfig, InMemoryDatabase, InMemoryLockProvider,
    InMemoryPublicationStore, JsonEventSerializer, LockProvider, PublicationRegistry, Published,
    RecoveryOutcome, RecoveryProcessor, ARCHIVE_TABLE, PUBLICATION_TABLE,
};

use support::{opened, AccountEvent};

#[test]
fn json_document_drives_store_and_recovery() {
    let config = EventsConfig::from_json_str(
        r#"{
            "completion-mode": "ARCHIVE",
            "schema-initialization": { "enabled": true },
            "republish-on-restart": { "enabled": true, "lock-name": "orders-recovery", "lock-timeout": "250ms" }
        }"#,
    )
    .unwrap();

    let database = InMemoryDatabase::new();
    let store =
        InMemoryPublicationStore::from_config(database.clone(), JsonEventSerializer, &config.store_config())
            .unwrap();
    let registry = PublicationRegistry::new(store);
    let event = Published::new(opened("acc-1"));
    let records = registry.store(&event, vec!["ledger".into()]).unwrap();
    registry.mark_completed(&records[0], chrono::Utc::now()).unwrap();

    assert_eq!(database.row_count(PUBLICATION_TABLE).unwrap(), 0);
    assert_eq!(database.row_count(ARCHIVE_TABLE).unwrap(), 1);

    // the configured lock is held elsewhere: this instance backs off
    let provider = Arc::new(InMemoryLockProvider::new());
    let _elsewhere = provider
        .try_acquire("orders-recovery", Duration::ZERO)
        .unwrap()
        .unwrap();
    let processor = RecoveryProcessor::from_config(&config.recovery_config(), provider);
    let outcome = processor
        .run(&NoBacklog)
        .unwrap();

    assert_eq!(
        outcome,
        RecoveryOutcome::LockNotAcquired {
            lock_name: "orders-recovery".into()
        }
    );
}

struct NoBacklog;

impl publication_registry::Resubmitter for NoBacklog {
    fn resubmit_incomplete(
        &self,
    ) -> Result<publication_registry::ProcessingSummary, publication_registry::StoreError> {
        Ok(Default::default())
    }

    fn resubmit_incomplete_older_than(
        &self,
        _age: Duration,
    ) -> Result<publication_registry::ProcessingSummary, publication_registry::StoreError> {
        Ok(Default::default())
    }
}

#[test]
fn environment_variables() {
    let config = EventsConfig::from_env_vars(vec![
        ("EVENTS_COMPLETION_MODE".to_string(), "delete".to_string()),
        ("EVENTS_REPUBLISH_ON_RESTART".to_string(), "true".to_string()),
        ("EVENTS_REPUBLISH_ON_RESTART_LOCK_NAME".to_string(), "recovery".to_string()),
        ("EVENTS_REPUBLISH_ON_RESTART_LOCK_TIMEOUT".to_string(), "2m".to_string()),
        ("EVENTS_FAILED_ATTEMPT_LIMIT".to_string(), "4".to_string()),
        ("HOME".to_string(), "/root".to_string()),
    ])
    .unwrap();

    assert_eq!(config.completion_mode, CompletionMode::Delete);
    assert_eq!(config.failed_attempt_limit, Some(4));
    let recovery = config.recovery_config();
    assert!(recovery.enabled);
    assert_eq!(recovery.lock_name.as_deref(), Some("recovery"));
    assert_eq!(recovery.lock_timeout, Duration::from_secs(120));
}

#[test]
fn schema_initialization_disabled_requires_provisioned_tables() {
    let config = EventsConfig::from_properties([("completion-mode", "UPDATE")]).unwrap();
    let database = InMemoryDatabase::new();
    let store =
        InMemoryPublicationStore::from_config(database.clone(), JsonEventSerializer, &config.store_config())
            .unwrap();
    let registry = PublicationRegistry::<AccountEvent, _>::new(store);

    assert!(registry
        .store(&Published::new(opened("acc-1")), vec!["ledger".into()])
        .is_err());

    database.create_table(PUBLICATION_TABLE).unwrap();
    assert!(registry
        .store(&Published::new(opened("acc-1")), vec!["ledger".into()])
        .is_ok());
}

#[test]
fn invalid_values_are_reported_with_their_key() {
    let err = EventsConfig::from_properties([("events.republish-on-restart.lock-timeout", "soon")])
        .unwrap_err();

    match err {
        ConfigError::InvalidValue { key, value, .. } => {
            assert_eq!(key, "republish-on-restart.lock-timeout");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}
