//! Per-type state of a node
//!
//! An [`Entity`] pairs the log of one record type with its indexed
//! snapshot behind a single mutex. Every mutation updates memory first,
//! then appends to the log; a failed append rolls the memory change back.

use crate::common::{Error, Result, StorageConfig};
use crate::model::{Record, Schema};
use crate::query::{self, Query};
use crate::storage::{CompactReport, IndexedStore, LogOptions, LogStore};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

struct EntityState {
    log: LogStore,
    store: IndexedStore,
}

pub struct Entity {
    schema: Arc<Schema>,
    state: Mutex<EntityState>,
}

impl Entity {
    /// Open the log, optionally compact it, and rebuild the snapshot.
    pub fn open(schema: Arc<Schema>, path: impl AsRef<Path>, storage: &StorageConfig) -> Result<Self> {
        let mut log = LogStore::open(path, schema.clone(), LogOptions::from(storage))?;

        if storage.compact_on_startup {
            log.compact()?;
        }

        let records = log.read_all()?;
        let mut store = IndexedStore::new(schema.clone());
        store.set(records)?;

        tracing::info!(
            "Loaded {} {} records from {:?}",
            store.len(),
            schema.name(),
            log.path()
        );

        Ok(Self {
            schema,
            state: Mutex::new(EntityState { log, store }),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Add a record whose `Id` is not live.
    pub fn insert(&self, record: Record) -> Result<()> {
        if record.is_deleted() {
            return Err(Error::InvalidRecord("cannot insert a deleted record".into()));
        }
        let payload = self.schema.encode(&record)?;
        let id = record.id();

        let mut state = self.lock()?;
        state.store.add(record)?;
        if let Err(e) = state.log.append(&payload) {
            state.store.remove(id);
            return Err(e);
        }
        Ok(())
    }

    /// Replace a live record.
    pub fn update(&self, record: Record) -> Result<()> {
        if record.is_deleted() {
            return Err(Error::InvalidRecord(
                "update cannot set the deleted flag, use delete".into(),
            ));
        }
        let payload = self.schema.encode(&record)?;
        let id = record.id();

        let mut state = self.lock()?;
        let previous = state
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        state.store.update(record)?;
        if let Err(e) = state.log.append(&payload) {
            state.store.update(previous)?;
            return Err(e);
        }
        Ok(())
    }

    /// Hide a live record. The logged entry is always a tombstone.
    pub fn delete(&self, mut record: Record) -> Result<()> {
        record.set_deleted(true);
        let payload = self.schema.encode(&record)?;
        let id = record.id();

        let mut state = self.lock()?;
        let previous = state
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        state.store.remove(id);
        if let Err(e) = state.log.append(&payload) {
            state.store.add(previous)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, id: uuid::Uuid) -> Result<Option<Record>> {
        Ok(self.lock()?.store.get(id).cloned())
    }

    pub fn get_all(&self) -> Result<Vec<Record>> {
        Ok(self.lock()?.store.get_all())
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Record>> {
        let state = self.lock()?;
        query::evaluate(query, &state.store)
    }

    pub fn compact(&self) -> Result<CompactReport> {
        self.lock()?.log.compact()
    }

    /// Flush buffered log entries and fsync the file.
    pub fn sync(&self) -> Result<()> {
        self.lock()?.log.sync()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.store.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, EntityState>> {
        Ok(self.state.lock()?)
    }
}

/// Entities served by a node, by record type name
#[derive(Default)]
pub struct Registry {
    entities: BTreeMap<String, Arc<Entity>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: Entity) -> Result<()> {
        let name = entity.name().to_string();
        if self.entities.contains_key(&name) {
            return Err(Error::InvalidConfig(format!("entity {} registered twice", name)));
        }
        self.entities.insert(name, Arc::new(entity));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Entity>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Compact every entity; a failure is logged and the rest continue.
    pub fn compact_all(&self) -> Vec<(String, CompactReport)> {
        let mut reports = Vec::new();
        for entity in self.entities.values() {
            match entity.compact() {
                Ok(report) => reports.push((entity.name().to_string(), report)),
                Err(e) => tracing::warn!("Compaction of {} failed: {}", entity.name(), e),
            }
        }
        reports
    }

    pub fn sync_all(&self) {
        for entity in self.entities.values() {
            if let Err(e) = entity.sync() {
                tracing::warn!("Sync of {} failed: {}", entity.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FlushPolicy;
    use crate::model::{FieldType, Value};
    use crate::query::{Filter, Operator};
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("account", 1)
                .field(2, "owner", FieldType::String)
                .indexed()
                .field(3, "balance", FieldType::I64)
                .sorted()
                .build()
                .unwrap(),
        )
    }

    fn storage() -> StorageConfig {
        StorageConfig {
            flush_policy: FlushPolicy::Never,
            ..StorageConfig::default()
        }
    }

    fn account(schema: &Arc<Schema>, owner: &str, balance: i64) -> Record {
        schema
            .new_blank()
            .with(2, Value::String(owner.into()))
            .unwrap()
            .with(3, Value::I64(balance))
            .unwrap()
    }

    #[test]
    fn test_mutations_and_rejections() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let entity = Entity::open(schema.clone(), dir.path().join("account.log"), &storage()).unwrap();

        let mut a = account(&schema, "ann", 10);
        entity.insert(a.clone()).unwrap();
        assert!(matches!(entity.insert(a.clone()), Err(Error::AlreadyExists(_))));

        a.set(3, Value::I64(25)).unwrap();
        entity.update(a.clone()).unwrap();
        assert_eq!(entity.get(a.id()).unwrap(), Some(a.clone()));

        let ghost = account(&schema, "ghost", 0);
        assert!(matches!(entity.update(ghost.clone()), Err(Error::NotFound(_))));
        assert!(matches!(entity.delete(ghost), Err(Error::NotFound(_))));

        let mut tombstone = a.clone();
        tombstone.set_deleted(true);
        assert!(matches!(entity.insert(tombstone), Err(Error::InvalidRecord(_))));

        entity.delete(a.clone()).unwrap();
        assert!(entity.is_empty().unwrap());

        // insert, update, delete; rejections append nothing
        let state = entity.lock().unwrap();
        assert_eq!(state.log.entry_count().unwrap(), 3);
    }

    #[test]
    fn test_reopen_rebuilds_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account.log");
        let schema = schema();

        let a = account(&schema, "ann", 1);
        let b = account(&schema, "bob", 2);
        {
            let entity = Entity::open(schema.clone(), &path, &storage()).unwrap();
            entity.insert(a.clone()).unwrap();
            entity.insert(b.clone()).unwrap();
            entity.delete(a.clone()).unwrap();
        }

        let entity = Entity::open(schema.clone(), &path, &storage()).unwrap();
        assert_eq!(entity.get_all().unwrap(), vec![b.clone()]);

        // compact_on_startup dropped the insert/delete pair
        let state = entity.lock().unwrap();
        assert_eq!(state.log.entry_count().unwrap(), 1);
        drop(state);

        let found = entity
            .query(&Query::and(vec![Filter::new(
                2,
                Operator::Equal,
                Value::String("bob".into()),
            )]))
            .unwrap();
        assert_eq!(found, vec![b]);
    }

    #[test]
    fn test_registry_lookup() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::new();
        registry
            .register(Entity::open(schema(), dir.path().join("account.log"), &storage()).unwrap())
            .unwrap();

        assert!(registry.get("account").is_ok());
        assert!(matches!(registry.get("nope"), Err(Error::UnknownEntity(_))));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["account"]);

        let again = Entity::open(schema(), dir.path().join("other.log"), &storage()).unwrap();
        assert!(registry.register(again).is_err());
    }

    #[test]
    fn test_sync_all_writes_buffered_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("account.log");
        let schema = schema();
        let mut registry = Registry::new();
        registry
            .register(Entity::open(schema.clone(), &path, &storage()).unwrap())
            .unwrap();

        let a = account(&schema, "ann", 3);
        registry.get("account").unwrap().insert(a.clone()).unwrap();
        // Never policy: still buffered
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        registry.sync_all();
        let expected = 8 + a.encode().unwrap().len() as u64;
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    }
}
