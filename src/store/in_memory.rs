use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::event::Event;
use crate::publication::{
    CompletionMode, FailedAttempt, PublicationId, PublicationRecord, TargetIdentifier,
};
use crate::serializer::{EventSerializer, JsonEventSerializer};

use super::row::{content_hash, PublicationRow};
use super::PublicationStore;

pub const PUBLICATION_TABLE: &str = "event_publication";
pub const ARCHIVE_TABLE: &str = "event_publication_archive";

type Tables = HashMap<&'static str, Vec<PublicationRow>>;

/// Shared in-process storage holding publication tables.
///
/// Cloning creates another handle to the same storage, so several stores (or
/// several registries standing in for separate processes) can work against
/// one database.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table if it does not exist yet.
    pub fn create_table(&self, name: &'static str) -> Result<(), StoreError> {
        self.write("create table")?.entry(name).or_default();
        Ok(())
    }

    pub fn has_table(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.read("has table")?.contains_key(name))
    }

    /// Insert a raw row, bypassing serialization. Useful for migrations and
    /// for planting rows a store cannot read.
    pub fn insert_row(&self, table: &'static str, row: PublicationRow) -> Result<(), StoreError> {
        let mut tables = self.write("insert row")?;
        table_mut(&mut tables, table)?.push(row);
        Ok(())
    }

    /// Snapshot of the rows of a table in insertion order.
    pub fn rows(&self, table: &'static str) -> Result<Vec<PublicationRow>, StoreError> {
        let tables = self.read("rows")?;
        Ok(table_ref(&tables, table)?.clone())
    }

    pub fn row_count(&self, table: &'static str) -> Result<usize, StoreError> {
        let tables = self.read("row count")?;
        Ok(table_ref(&tables, table)?.len())
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }
}

fn table_ref<'a>(
    tables: &'a Tables,
    name: &'static str,
) -> Result<&'a Vec<PublicationRow>, StoreError> {
    tables.get(name).ok_or(StoreError::MissingTable(name))
}

fn table_mut<'a>(
    tables: &'a mut Tables,
    name: &'static str,
) -> Result<&'a mut Vec<PublicationRow>, StoreError> {
    tables.get_mut(name).ok_or(StoreError::MissingTable(name))
}

/// Reference [`PublicationStore`] over an [`InMemoryDatabase`].
#[derive(Clone)]
pub struct InMemoryPublicationStore<S = JsonEventSerializer> {
    database: InMemoryDatabase,
    serializer: S,
    mode: CompletionMode,
    failed_attempt_limit: Option<usize>,
}

impl InMemoryPublicationStore<JsonEventSerializer> {
    /// A store persisting JSON payloads with the default completion mode.
    pub fn json(database: InMemoryDatabase) -> Self {
        Self::new(database, JsonEventSerializer)
    }
}

impl<S: EventSerializer> InMemoryPublicationStore<S> {
    pub fn new(database: InMemoryDatabase, serializer: S) -> Self {
        InMemoryPublicationStore {
            database,
            serializer,
            mode: CompletionMode::default(),
            failed_attempt_limit: None,
        }
    }

    /// Build a store from configuration, creating the schema when enabled.
    pub fn from_config(
        database: InMemoryDatabase,
        serializer: S,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        let store = Self::new(database, serializer)
            .with_completion_mode(config.completion_mode)
            .with_failed_attempt_limit(config.failed_attempt_limit);
        if config.schema_initialization {
            store.initialize_schema()?;
        }
        Ok(store)
    }

    pub fn with_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep only the most recent `limit` failed attempts per record.
    pub fn with_failed_attempt_limit(mut self, limit: Option<usize>) -> Self {
        self.failed_attempt_limit = limit;
        self
    }

    /// Create the tables this store's completion mode needs.
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.database.create_table(PUBLICATION_TABLE)?;
        if self.mode.uses_archive() {
            self.database.create_table(ARCHIVE_TABLE)?;
        }
        debug!(mode = %self.mode, "publication schema initialized");
        Ok(())
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.database
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    fn decode<E: Event>(&self, row: &PublicationRow) -> Option<PublicationRecord<E>> {
        match self
            .serializer
            .deserialize::<E>(&row.serialized_event, &row.event_type)
        {
            Ok(event) => Some(PublicationRecord::restore(
                PublicationId::from_uuid(row.id),
                event,
                row.event_type.clone(),
                TargetIdentifier::new(row.listener_id.clone()),
                row.publication_date,
                row.completion_date,
                row.failed_attempts.clone(),
            )),
            Err(err) => {
                warn!(publication_id = %row.id, error = %err, "skipping unreadable publication");
                None
            }
        }
    }

    /// Decode rows, dropping unreadable ones, oldest publication first.
    fn decode_all<E: Event>(&self, rows: Vec<PublicationRow>) -> Vec<PublicationRecord<E>> {
        let mut records: Vec<_> = rows.iter().filter_map(|row| self.decode(row)).collect();
        records.sort_by_key(|record| record.publication_date());
        records
    }

    fn select(
        &self,
        table: &'static str,
        predicate: impl Fn(&PublicationRow) -> bool,
    ) -> Result<Vec<PublicationRow>, StoreError> {
        let tables = self.database.read("select")?;
        Ok(table_ref(&tables, table)?
            .iter()
            .filter(|row| predicate(row))
            .cloned()
            .collect())
    }

    /// Apply the completion policy to the live row at `position`.
    fn complete_row(
        &self,
        tables: &mut Tables,
        position: usize,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self.mode {
            CompletionMode::Update => {
                table_mut(tables, PUBLICATION_TABLE)?[position].completion_date = Some(at);
            }
            CompletionMode::Delete => {
                table_mut(tables, PUBLICATION_TABLE)?.remove(position);
            }
            CompletionMode::Archive => {
                let mut archived = table_ref(tables, PUBLICATION_TABLE)?[position].clone();
                archived.completion_date = Some(at);

                // keyed insert: a retried archive step must not duplicate
                let archive = table_mut(tables, ARCHIVE_TABLE)?;
                if archive.iter().any(|row| row.id == archived.id) {
                    debug!(publication_id = %archived.id, "publication already archived");
                } else {
                    archive.push(archived);
                }

                table_mut(tables, PUBLICATION_TABLE)?.remove(position);
            }
        }
        Ok(())
    }

    fn completed_table(&self) -> Option<&'static str> {
        match self.mode {
            CompletionMode::Update => Some(PUBLICATION_TABLE),
            CompletionMode::Delete => None,
            CompletionMode::Archive => Some(ARCHIVE_TABLE),
        }
    }

    fn purge_completed(
        &self,
        predicate: impl Fn(&PublicationRow) -> bool,
    ) -> Result<usize, StoreError> {
        let Some(table) = self.completed_table() else {
            return Ok(0);
        };
        let mut tables = self.database.write("delete completed")?;
        let rows = table_mut(&mut tables, table)?;
        let before = rows.len();
        rows.retain(|row| !(row.is_completed() && predicate(row)));
        Ok(before - rows.len())
    }
}

impl<E: Event, S: EventSerializer> PublicationStore<E> for InMemoryPublicationStore<S> {
    fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    fn create(&self, record: PublicationRecord<E>) -> Result<PublicationRecord<E>, StoreError> {
        let serialized_event = self.serializer.serialize(record.event())?;
        let row = PublicationRow {
            id: record.id().as_uuid(),
            publication_date: record.publication_date(),
            listener_id: record.target().as_str().to_string(),
            event_hash: content_hash(&serialized_event),
            serialized_event,
            event_type: record.event_type().to_string(),
            completion_date: record.completion_date(),
            failed_attempts: record.failed_attempts().to_vec(),
        };

        let mut tables = self.database.write("create")?;
        table_mut(&mut tables, PUBLICATION_TABLE)?.push(row);
        debug!(publication_id = %record.id(), target = %record.target(), "publication created");
        Ok(record)
    }

    fn mark_completed(
        &self,
        event: &E,
        target: &TargetIdentifier,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let serialized_event = self.serializer.serialize(event)?;
        let event_hash = content_hash(&serialized_event);

        let mut tables = self.database.write("mark completed")?;
        let position = table_ref(&tables, PUBLICATION_TABLE)?
            .iter()
            .enumerate()
            .filter(|(_, row)| row.matches(&event_hash, &serialized_event, target.as_str()))
            .min_by_key(|(_, row)| row.publication_date)
            .map(|(position, _)| position);

        match position {
            Some(position) => {
                self.complete_row(&mut tables, position, at)?;
                debug!(target = %target, mode = %self.mode, "publication completed by content");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_completed_by_id(
        &self,
        id: PublicationId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.database.write("mark completed by id")?;
        let position = table_ref(&tables, PUBLICATION_TABLE)?
            .iter()
            .position(|row| row.id == id.as_uuid() && !row.is_completed());

        match position {
            Some(position) => {
                self.complete_row(&mut tables, position, at)?;
                debug!(publication_id = %id, mode = %self.mode, "publication completed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record_failure(&self, id: PublicationId, attempt: FailedAttempt) -> Result<(), StoreError> {
        let mut tables = self.database.write("record failure")?;
        let rows = table_mut(&mut tables, PUBLICATION_TABLE)?;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id.as_uuid()) {
            row.failed_attempts.push(attempt);
            if let Some(limit) = self.failed_attempt_limit {
                let excess = row.failed_attempts.len().saturating_sub(limit);
                row.failed_attempts.drain(..excess);
            }
        }
        Ok(())
    }

    fn find_incomplete(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        let rows = self.select(PUBLICATION_TABLE, |row| !row.is_completed())?;
        Ok(self.decode_all(rows))
    }

    fn find_incomplete_published_before(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        let rows = self.select(PUBLICATION_TABLE, |row| {
            !row.is_completed() && row.publication_date < instant
        })?;
        Ok(self.decode_all(rows))
    }

    fn find_by_event_and_target(
        &self,
        event: &E,
        target: &TargetIdentifier,
    ) -> Result<Option<PublicationRecord<E>>, StoreError> {
        let serialized_event = self.serializer.serialize(event)?;
        let event_hash = content_hash(&serialized_event);
        let rows = self.select(PUBLICATION_TABLE, |row| {
            row.matches(&event_hash, &serialized_event, target.as_str())
        })?;
        Ok(self.decode_all(rows).into_iter().next())
    }

    fn find_completed(&self) -> Result<Vec<PublicationRecord<E>>, StoreError> {
        let Some(table) = self.completed_table() else {
            return Ok(Vec::new());
        };
        let rows = self.select(table, PublicationRow::is_completed)?;
        Ok(self.decode_all(rows))
    }

    fn delete_by_identifiers(&self, ids: &[PublicationId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tables = self.database.write("delete by identifiers")?;
        let rows = table_mut(&mut tables, PUBLICATION_TABLE)?;
        let before = rows.len();
        rows.retain(|row| !ids.iter().any(|id| id.as_uuid() == row.id));
        Ok(before - rows.len())
    }

    fn delete_completed(&self) -> Result<usize, StoreError> {
        self.purge_completed(|_| true)
    }

    fn delete_completed_before(&self, instant: DateTime<Utc>) -> Result<usize, StoreError> {
        self.purge_completed(|row| row.completion_date.is_some_and(|date| date < instant))
    }
}
