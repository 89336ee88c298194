//! Generic record type
//!
//! One record = shared schema pointer + typed values addressed by field id.
//! Slots 0 and 1 always hold the implicit `Id` and `Deleted` fields.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::schema::{FieldId, Schema, FIELD_DELETED, FIELD_ID};
use super::value::Value;
use crate::common::{Error, Result};

#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    /// Values must already match the schema layout.
    pub(crate) fn from_parts(schema: Arc<Schema>, values: Vec<Value>) -> Self {
        debug_assert!(schema.check_values(&values).is_ok());
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> Uuid {
        match self.values.get(FIELD_ID as usize) {
            Some(Value::Uuid(id)) => *id,
            _ => Uuid::nil(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.values.get(FIELD_DELETED as usize), Some(Value::Bool(true)))
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.values[FIELD_DELETED as usize] = Value::Bool(deleted);
    }

    pub fn get(&self, field: FieldId) -> Result<&Value> {
        self.values
            .get(field as usize)
            .ok_or(Error::UnknownField(field))
    }

    /// Set a field, checking its type. The `Id` field cannot be changed.
    pub fn set(&mut self, field: FieldId, value: Value) -> Result<()> {
        if field == FIELD_ID {
            return Err(Error::ImmutableField(field));
        }
        let expected = self.schema.field_type(field)?;
        if value.field_type() != expected {
            return Err(Error::TypeMismatch {
                field,
                expected,
                actual: value.field_type(),
            });
        }
        self.values[field as usize] = value;
        Ok(())
    }

    /// Builder-style [`Record::set`]
    pub fn with(mut self, field: FieldId, value: Value) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.values).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Render as a JSON object keyed by field name
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(field, value)| (field.name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(object)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.values == other.values
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &self.schema.name())
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use chrono::{TimeZone, Utc};

    fn event_schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("event", 3)
                .field(2, "title", FieldType::String)
                .field(3, "at", FieldType::Timestamp)
                .field(4, "priority", FieldType::I8)
                .field(5, "weight", FieldType::F32)
                .field(6, "owner", FieldType::Uuid)
                .field(7, "done", FieldType::Bool)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let schema = event_schema();
        let record = schema
            .new_blank()
            .with(2, Value::String("launch".into()))
            .unwrap()
            .with(3, Value::Timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()))
            .unwrap()
            .with(4, Value::I8(-3))
            .unwrap()
            .with(5, Value::F32(0.25))
            .unwrap()
            .with(6, Value::Uuid(Uuid::new_v4()))
            .unwrap()
            .with(7, Value::Bool(true))
            .unwrap();

        let bytes = schema.encode(&record).unwrap();
        let decoded = schema.decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.id(), record.id());
    }

    #[test]
    fn test_set_checks_type_and_immutability() {
        let schema = event_schema();
        let mut record = schema.new_blank();

        assert!(matches!(
            record.set(2, Value::I8(1)),
            Err(Error::TypeMismatch { field: 2, .. })
        ));
        assert!(matches!(
            record.set(FIELD_ID, Value::Uuid(Uuid::new_v4())),
            Err(Error::ImmutableField(FIELD_ID))
        ));
        assert!(matches!(
            record.set(42, Value::I8(1)),
            Err(Error::UnknownField(42))
        ));
    }

    #[test]
    fn test_tombstone_flag() {
        let schema = event_schema();
        let mut record = schema.new_blank();
        assert!(!record.is_deleted());
        record.set_deleted(true);
        assert!(record.is_deleted());

        let decoded = schema.decode(&record.encode().unwrap()).unwrap();
        assert!(decoded.is_deleted());
    }

    #[test]
    fn test_to_json_uses_field_names() {
        let schema = event_schema();
        let record = schema
            .new_blank()
            .with(2, Value::String("x".into()))
            .unwrap();
        let json = record.to_json();
        assert_eq!(json["title"], "x");
        assert_eq!(json["deleted"], false);
        assert_eq!(json["id"], record.id().to_string());
    }
}
