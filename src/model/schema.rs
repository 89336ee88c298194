//! Schema descriptors
//!
//! A schema is the field table of one record type: field-id → (name,
//! type), which fields carry a secondary index and which of those are
//! kept sorted. The table is a dense `Vec`, so lookups by id are direct
//! indexing.

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

use super::record::Record;
use super::value::{FieldType, Value};
use crate::common::{Error, Result};

/// Small integer address of a field
pub type FieldId = u16;

/// Implicit unique identifier field
pub const FIELD_ID: FieldId = 0;
/// Implicit tombstone flag
pub const FIELD_DELETED: FieldId = 1;
/// First id available to user fields
pub const FIRST_USER_FIELD: FieldId = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub field_type: FieldType,
}

/// Field table of one record type
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    name: String,
    version: u32,
    fields: Vec<FieldDef>,
    indexed: BTreeSet<FieldId>,
    sorted: BTreeSet<FieldId>,
}

impl Schema {
    pub fn builder(name: impl Into<String>, version: u32) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            version,
            fields: Vec::new(),
            indexed: BTreeSet::new(),
            sorted: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_type(&self, id: FieldId) -> Result<FieldType> {
        self.fields
            .get(id as usize)
            .map(|f| f.field_type)
            .ok_or(Error::UnknownField(id))
    }

    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.id)
    }

    pub fn is_indexed(&self, id: FieldId) -> bool {
        self.indexed.contains(&id)
    }

    pub fn is_sorted(&self, id: FieldId) -> bool {
        self.sorted.contains(&id)
    }

    pub fn indexed_field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.indexed.iter().copied()
    }

    pub fn sorted_field_ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.sorted.iter().copied()
    }

    /// A fresh record: new random `Id`, not deleted, zero values elsewhere.
    pub fn new_blank(self: &Arc<Self>) -> Record {
        self.blank_with_id(Uuid::new_v4())
    }

    pub fn blank_with_id(self: &Arc<Self>, id: Uuid) -> Record {
        let values = self
            .fields
            .iter()
            .map(|f| match f.id {
                FIELD_ID => Value::Uuid(id),
                _ => f.field_type.zero(),
            })
            .collect();
        Record::from_parts(Arc::clone(self), values)
    }

    /// Encode a record of this type to its opaque byte form.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        if record.schema().name() != self.name {
            return Err(Error::InvalidRecord(format!(
                "record of type {} encoded with schema {}",
                record.schema().name(),
                self.name
            )));
        }
        record.encode()
    }

    /// Decode bytes produced by [`Record::encode`], validating the shape.
    pub fn decode(self: &Arc<Self>, bytes: &[u8]) -> Result<Record> {
        let values: Vec<Value> = bincode::deserialize(bytes)
            .map_err(|e| Error::Decode(format!("{} record: {}", self.name, e)))?;
        self.check_values(&values)?;
        Ok(Record::from_parts(Arc::clone(self), values))
    }

    pub(crate) fn check_values(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::Decode(format!(
                "{} record has {} fields, expected {}",
                self.name,
                values.len(),
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(values) {
            if value.field_type() != field.field_type {
                return Err(Error::Decode(format!(
                    "{} field {} ({}) holds a {}",
                    self.name,
                    field.id,
                    field.field_type,
                    value.field_type()
                )));
            }
        }
        Ok(())
    }

    /// Build a record from a JSON object keyed by field name.
    ///
    /// A missing `id` gets a fresh one; missing fields keep their zero value.
    pub fn record_from_json(self: &Arc<Self>, json: &serde_json::Value) -> Result<Record> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidRecord("expected a JSON object".into()))?;

        let id = match object.get("id") {
            Some(v) => match Value::from_json(FieldType::Uuid, v)? {
                Value::Uuid(id) => id,
                _ => return Err(Error::InvalidRecord("id must be a uuid".into())),
            },
            None => Uuid::new_v4(),
        };

        let mut record = self.blank_with_id(id);
        for (name, v) in object {
            if name == "id" {
                continue;
            }
            let field = self
                .field_id(name)
                .ok_or_else(|| Error::InvalidRecord(format!("unknown field {}", name)))?;
            let value = Value::from_json(self.field_type(field)?, v)?;
            record.set(field, value)?;
        }
        Ok(record)
    }
}

pub struct SchemaBuilder {
    name: String,
    version: u32,
    fields: Vec<FieldDef>,
    indexed: BTreeSet<FieldId>,
    sorted: BTreeSet<FieldId>,
}

impl SchemaBuilder {
    /// Declare a user field. Ids start at [`FIRST_USER_FIELD`] and must be contiguous.
    pub fn field(mut self, id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            id,
            name: name.into(),
            field_type,
        });
        self
    }

    /// Keep a hash index on the last declared field
    pub fn indexed(mut self) -> Self {
        if let Some(field) = self.fields.last() {
            self.indexed.insert(field.id);
        }
        self
    }

    /// Keep a sorted index on the last declared field
    pub fn sorted(mut self) -> Self {
        if let Some(field) = self.fields.last() {
            self.indexed.insert(field.id);
            self.sorted.insert(field.id);
        }
        self
    }

    pub fn build(self) -> Result<Schema> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("schema name cannot be empty".into()));
        }

        let mut fields = vec![
            FieldDef {
                id: FIELD_ID,
                name: "id".into(),
                field_type: FieldType::Uuid,
            },
            FieldDef {
                id: FIELD_DELETED,
                name: "deleted".into(),
                field_type: FieldType::Bool,
            },
        ];

        for (expected, field) in (FIRST_USER_FIELD..).zip(self.fields) {
            if field.id != expected {
                return Err(Error::InvalidConfig(format!(
                    "{}: field {} has id {}, expected {}",
                    self.name, field.name, field.id, expected
                )));
            }
            if fields.iter().any(|f| f.name == field.name) {
                return Err(Error::InvalidConfig(format!(
                    "{}: duplicate field name {}",
                    self.name, field.name
                )));
            }
            fields.push(field);
        }

        Ok(Schema {
            name: self.name,
            version: self.version,
            fields,
            indexed: self.indexed,
            sorted: self.sorted,
        })
    }
}
