//! Field types and typed values
//!
//! Every field of a record holds a [`Value`] whose variant matches the
//! [`FieldType`] declared in the schema. Floats compare with IEEE total
//! ordering so that index keys and predicates agree on equality.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::query::Operator;

/// Type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Timestamp,
    Uuid,
}

impl FieldType {
    /// Blank value for a fresh record
    pub fn zero(self) -> Value {
        match self {
            FieldType::String => Value::String(String::new()),
            FieldType::Bool => Value::Bool(false),
            FieldType::I8 => Value::I8(0),
            FieldType::I16 => Value::I16(0),
            FieldType::I32 => Value::I32(0),
            FieldType::I64 => Value::I64(0),
            FieldType::U8 => Value::U8(0),
            FieldType::U16 => Value::U16(0),
            FieldType::U32 => Value::U32(0),
            FieldType::U64 => Value::U64(0),
            FieldType::F32 => Value::F32(0.0),
            FieldType::F64 => Value::F64(0.0),
            FieldType::Timestamp => Value::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
            FieldType::Uuid => Value::Uuid(Uuid::nil()),
        }
    }

    /// Numeric and timestamp types support the ordering operators.
    pub fn is_ordered(self) -> bool {
        !matches!(self, FieldType::String | FieldType::Bool | FieldType::Uuid)
    }

    /// Is `op` defined for values of this type?
    pub fn supports(self, op: Operator) -> bool {
        use Operator::*;
        match op {
            Equal | NotEqual => true,
            Greater | Lesser | GreaterOrEqual | LesserOrEqual => self.is_ordered(),
            Contains | NotContains | StartsWith | EndsWith => self == FieldType::String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::I8 => "i8",
            FieldType::I16 => "i16",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
            FieldType::U8 => "u8",
            FieldType::U16 => "u16",
            FieldType::U32 => "u32",
            FieldType::U64 => "u64",
            FieldType::F32 => "f32",
            FieldType::F64 => "f64",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// A typed field value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::String(_) => FieldType::String,
            Value::Bool(_) => FieldType::Bool,
            Value::I8(_) => FieldType::I8,
            Value::I16(_) => FieldType::I16,
            Value::I32(_) => FieldType::I32,
            Value::I64(_) => FieldType::I64,
            Value::U8(_) => FieldType::U8,
            Value::U16(_) => FieldType::U16,
            Value::U32(_) => FieldType::U32,
            Value::U64(_) => FieldType::U64,
            Value::F32(_) => FieldType::F32,
            Value::F64(_) => FieldType::F64,
            Value::Timestamp(_) => FieldType::Timestamp,
            Value::Uuid(_) => FieldType::Uuid,
        }
    }

    /// Compare two values of the same type; `None` across types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        let ordering = match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I8(a), Value::I8(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::U8(a), Value::U8(b)) => a.cmp(b),
            (Value::U16(a), Value::U16(b)) => a.cmp(b),
            (Value::U32(a), Value::U32(b)) => a.cmp(b),
            (Value::U64(a), Value::U64(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            _ => return None,
        };
        Some(ordering)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render as JSON (timestamps as RFC 3339, UUIDs hyphenated)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::String(v) => json!(v),
            Value::Bool(v) => json!(v),
            Value::I8(v) => json!(v),
            Value::I16(v) => json!(v),
            Value::I32(v) => json!(v),
            Value::I64(v) => json!(v),
            Value::U8(v) => json!(v),
            Value::U16(v) => json!(v),
            Value::U32(v) => json!(v),
            Value::U64(v) => json!(v),
            Value::F32(v) => json!(v),
            Value::F64(v) => json!(v),
            Value::Timestamp(v) => json!(v.to_rfc3339()),
            Value::Uuid(v) => json!(v.to_string()),
        }
    }

    /// Parse a JSON value as the given field type.
    pub fn from_json(field_type: FieldType, json: &serde_json::Value) -> Result<Value> {
        let invalid = || Error::InvalidRecord(format!("{} is not a valid {}", json, field_type));

        let signed = || json.as_i64().ok_or_else(invalid);
        let unsigned = || json.as_u64().ok_or_else(invalid);

        let value = match field_type {
            FieldType::String => Value::String(json.as_str().ok_or_else(invalid)?.to_string()),
            FieldType::Bool => Value::Bool(json.as_bool().ok_or_else(invalid)?),
            FieldType::I8 => Value::I8(i8::try_from(signed()?).map_err(|_| invalid())?),
            FieldType::I16 => Value::I16(i16::try_from(signed()?).map_err(|_| invalid())?),
            FieldType::I32 => Value::I32(i32::try_from(signed()?).map_err(|_| invalid())?),
            FieldType::I64 => Value::I64(signed()?),
            FieldType::U8 => Value::U8(u8::try_from(unsigned()?).map_err(|_| invalid())?),
            FieldType::U16 => Value::U16(u16::try_from(unsigned()?).map_err(|_| invalid())?),
            FieldType::U32 => Value::U32(u32::try_from(unsigned()?).map_err(|_| invalid())?),
            FieldType::U64 => Value::U64(unsigned()?),
            FieldType::F32 => Value::F32(json.as_f64().ok_or_else(invalid)? as f32),
            FieldType::F64 => Value::F64(json.as_f64().ok_or_else(invalid)?),
            FieldType::Timestamp => {
                let ts = match json {
                    serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                        .map_err(|_| invalid())?
                        .with_timezone(&Utc),
                    serde_json::Value::Number(_) => Utc
                        .timestamp_millis_opt(signed()?)
                        .single()
                        .ok_or_else(invalid)?,
                    _ => return Err(invalid()),
                };
                Value::Timestamp(ts)
            }
            FieldType::Uuid => {
                Value::Uuid(Uuid::parse_str(json.as_str().ok_or_else(invalid)?).map_err(|_| invalid())?)
            }
        };
        Ok(value)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(v) => write!(f, "{:?}", v),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// A value usable as a hash or B-tree key.
///
/// Values of one field always share a variant; across variants the key
/// falls back to the variant order.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl IndexKey {
    fn rank(&self) -> u8 {
        self.0.field_type() as u8
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .compare(&other.0)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match &self.0 {
            Value::String(v) => v.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::I8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::U8(v) => v.hash(state),
            Value::U16(v) => v.hash(state),
            Value::U32(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_operator_support() {
        assert!(FieldType::String.supports(Operator::StartsWith));
        assert!(!FieldType::String.supports(Operator::Greater));
        assert!(!FieldType::Bool.supports(Operator::Lesser));
        assert!(!FieldType::Uuid.supports(Operator::Contains));
        assert!(FieldType::Timestamp.supports(Operator::GreaterOrEqual));
        assert!(FieldType::F32.supports(Operator::LesserOrEqual));
        assert!(!FieldType::U8.supports(Operator::EndsWith));
    }

    #[test]
    fn test_compare_same_and_cross_type() {
        assert_eq!(Value::I32(1).compare(&Value::I32(2)), Some(Ordering::Less));
        assert_eq!(Value::I32(1).compare(&Value::I64(1)), None);
        assert_eq!(
            Value::F64(f64::NAN).compare(&Value::F64(f64::NAN)),
            Some(Ordering::Equal)
        );
        assert_ne!(Value::String("a".into()), Value::String("b".into()));
    }

    #[test]
    fn test_index_key_hash_eq_consistent() {
        let mut keys = HashSet::new();
        keys.insert(IndexKey(Value::F64(1.5)));
        keys.insert(IndexKey(Value::F64(1.5)));
        keys.insert(IndexKey(Value::String("x".into())));
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&IndexKey(Value::String("x".into()))));
    }

    #[test]
    fn test_json_conversion() {
        let v = Value::from_json(FieldType::U8, &serde_json::json!(200)).unwrap();
        assert_eq!(v, Value::U8(200));
        assert!(Value::from_json(FieldType::U8, &serde_json::json!(300)).is_err());
        assert!(Value::from_json(FieldType::Bool, &serde_json::json!("true")).is_err());

        let ts = Value::from_json(
            FieldType::Timestamp,
            &serde_json::json!("2024-03-01T12:00:00Z"),
        )
        .unwrap();
        let back = Value::from_json(FieldType::Timestamp, &ts.to_json()).unwrap();
        assert_eq!(ts, back);

        let id = Uuid::new_v4();
        let v = Value::from_json(FieldType::Uuid, &Value::Uuid(id).to_json()).unwrap();
        assert_eq!(v, Value::Uuid(id));
    }

    #[test]
    fn test_zero_values_match_type() {
        for t in [FieldType::String, FieldType::I16, FieldType::F32, FieldType::Timestamp] {
            assert_eq!(t.zero().field_type(), t);
        }
    }
}
