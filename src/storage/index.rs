//! In-memory indexed snapshot of one record type
//!
//! Live records sit in an arena (`current`) with an `Id -> slot` map.
//! Every indexed field keeps buckets of `Id`s keyed by the field value:
//! a `HashMap` for plain indexes, a `BTreeMap` for sorted ones so that the
//! keys can be walked in either direction without sorting. Buckets keep
//! insertion order; [`IndexedStore::resolve`] turns a bucket back into
//! records in arena order, which is the order a full scan sees.

use crate::common::{Error, Result};
use crate::model::{FieldId, IndexKey, Record, Schema, Value};
use crate::query::Direction;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Buckets of one indexed field
#[derive(Debug)]
enum FieldIndex {
    Hash(HashMap<IndexKey, Vec<Uuid>>),
    Sorted(BTreeMap<IndexKey, Vec<Uuid>>),
}

impl FieldIndex {
    fn insert(&mut self, key: IndexKey, id: Uuid) {
        match self {
            FieldIndex::Hash(map) => map.entry(key).or_default().push(id),
            FieldIndex::Sorted(map) => map.entry(key).or_default().push(id),
        }
    }

    fn remove(&mut self, key: &IndexKey, id: Uuid) {
        let bucket = match self {
            FieldIndex::Hash(map) => map.get_mut(key),
            FieldIndex::Sorted(map) => map.get_mut(key),
        };
        let Some(bucket) = bucket else {
            return;
        };
        if let Some(pos) = bucket.iter().position(|b| *b == id) {
            bucket.remove(pos);
        }
        if bucket.is_empty() {
            match self {
                FieldIndex::Hash(map) => map.remove(key),
                FieldIndex::Sorted(map) => map.remove(key),
            };
        }
    }

    fn bucket(&self, key: &IndexKey) -> &[Uuid] {
        let bucket = match self {
            FieldIndex::Hash(map) => map.get(key),
            FieldIndex::Sorted(map) => map.get(key),
        };
        bucket.map(Vec::as_slice).unwrap_or(&[])
    }

    fn clear(&mut self) {
        match self {
            FieldIndex::Hash(map) => map.clear(),
            FieldIndex::Sorted(map) => map.clear(),
        }
    }

    fn entries(&self) -> usize {
        match self {
            FieldIndex::Hash(map) => map.values().map(Vec::len).sum(),
            FieldIndex::Sorted(map) => map.values().map(Vec::len).sum(),
        }
    }
}

/// Live records of one type plus their secondary indexes
#[derive(Debug)]
pub struct IndexedStore {
    schema: Arc<Schema>,
    current: Vec<Record>,
    slots: HashMap<Uuid, usize>,
    indexes: BTreeMap<FieldId, FieldIndex>,
}

impl IndexedStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        let indexes = schema
            .indexed_field_ids()
            .map(|field| {
                let index = if schema.is_sorted(field) {
                    FieldIndex::Sorted(BTreeMap::new())
                } else {
                    FieldIndex::Hash(HashMap::new())
                };
                (field, index)
            })
            .collect();

        Self {
            schema,
            current: Vec::new(),
            slots: HashMap::new(),
            indexes,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Add a record that is not live yet.
    pub fn add(&mut self, record: Record) -> Result<()> {
        self.check_type(&record)?;
        let id = record.id();
        if self.slots.contains_key(&id) {
            return Err(Error::AlreadyExists(id.to_string()));
        }

        self.index_record(&record);
        self.slots.insert(id, self.current.len());
        self.current.push(record);
        Ok(())
    }

    /// Remove the live record with this `Id`. Returns `false` when absent.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(slot) = self.slots.remove(&id) else {
            return false;
        };

        let removed = self.current.swap_remove(slot);
        if let Some(moved) = self.current.get(slot) {
            self.slots.insert(moved.id(), slot);
        }

        for (field, index) in self.indexes.iter_mut() {
            if let Ok(value) = removed.get(*field) {
                index.remove(&IndexKey(value.clone()), id);
            }
        }
        true
    }

    /// Replace the live record with the same `Id`.
    pub fn update(&mut self, record: Record) -> Result<()> {
        self.check_type(&record)?;
        let id = record.id();
        let slot = *self
            .slots
            .get(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let old = &self.current[slot];
        for (field, index) in self.indexes.iter_mut() {
            let (Ok(before), Ok(after)) = (old.get(*field), record.get(*field)) else {
                continue;
            };
            if before != after {
                index.remove(&IndexKey(before.clone()), id);
                index.insert(IndexKey(after.clone()), id);
            }
        }

        self.current[slot] = record;
        Ok(())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Record> {
        self.slots.get(&id).map(|slot| &self.current[*slot])
    }

    /// Live records in arena order
    pub fn records(&self) -> &[Record] {
        &self.current
    }

    /// Snapshot copy of every live record
    pub fn get_all(&self) -> Vec<Record> {
        self.current.clone()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.slots.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    /// Replace the whole collection and rebuild every index.
    ///
    /// When an `Id` appears more than once the later record wins and keeps
    /// the position of the first.
    pub fn set(&mut self, records: impl IntoIterator<Item = Record>) -> Result<()> {
        self.clear();

        for record in records {
            self.check_type(&record)?;
            match self.slots.get(&record.id()) {
                Some(&slot) => self.current[slot] = record,
                None => {
                    self.slots.insert(record.id(), self.current.len());
                    self.current.push(record);
                }
            }
        }

        let current = std::mem::take(&mut self.current);
        for record in &current {
            self.index_record(record);
        }
        self.current = current;

        tracing::debug!(
            "Rebuilt {} store: {} records, {} indexes",
            self.schema.name(),
            self.current.len(),
            self.indexes.len()
        );
        Ok(())
    }

    /// Live records named by `ids`, in arena order.
    ///
    /// Unknown `Id`s are skipped.
    pub fn resolve(&self, ids: &[Uuid]) -> Vec<&Record> {
        let mut slots: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.slots.get(id).copied())
            .collect();
        slots.sort_unstable();
        slots.into_iter().map(|slot| &self.current[slot]).collect()
    }

    /// Ids whose `field` equals `value`, in insertion order.
    ///
    /// `None` when the field carries no index.
    pub fn bucket(&self, field: FieldId, value: &Value) -> Option<&[Uuid]> {
        self.indexes
            .get(&field)
            .map(|index| index.bucket(&IndexKey(value.clone())))
    }

    /// Walk a sorted index bucket by bucket in key order.
    ///
    /// `None` when the field has no sorted index.
    pub fn sorted_buckets(
        &self,
        field: FieldId,
        direction: Direction,
    ) -> Option<Box<dyn Iterator<Item = &[Uuid]> + '_>> {
        match self.indexes.get(&field)? {
            FieldIndex::Sorted(map) => {
                let buckets = map.values().map(Vec::as_slice);
                let walk: Box<dyn Iterator<Item = &[Uuid]> + '_> = match direction {
                    Direction::Asc => Box::new(buckets),
                    Direction::Desc => Box::new(buckets.rev()),
                };
                Some(walk)
            }
            FieldIndex::Hash(_) => None,
        }
    }

    /// Total bucket entries of an index (equals `len()` when consistent)
    pub fn index_entries(&self, field: FieldId) -> Option<usize> {
        self.indexes.get(&field).map(FieldIndex::entries)
    }

    fn index_record(&mut self, record: &Record) {
        let id = record.id();
        for (field, index) in self.indexes.iter_mut() {
            if let Ok(value) = record.get(*field) {
                index.insert(IndexKey(value.clone()), id);
            }
        }
    }

    fn check_type(&self, record: &Record) -> Result<()> {
        if record.schema().name() != self.schema.name() {
            return Err(Error::InvalidRecord(format!(
                "{} record in {} store",
                record.schema().name(),
                self.schema.name()
            )));
        }
        Ok(())
    }
}
