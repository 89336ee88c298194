//! Record model
//!
//! Replaces per-type generated accessors with a schema descriptor: a
//! dense field table built once per record type, and a single generic
//! [`Record`] holding typed values addressed by field id.

pub mod record;
pub mod schema;
pub mod value;

pub use record::Record;
pub use schema::{FieldDef, FieldId, Schema, SchemaBuilder, FIELD_DELETED, FIELD_ID, FIRST_USER_FIELD};
pub use value::{FieldType, IndexKey, Value};
