//! Error types for keeldb

use thiserror::Error;

use crate::model::{FieldId, FieldType};
use crate::query::Operator;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("empty frame")]
    EmptyFrame,

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: u64, limit: u64 },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // === Storage Errors ===
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("truncated log entry at offset {offset}: expected {expected} bytes, found {available}")]
    TruncatedEntry {
        offset: u64,
        expected: u64,
        available: u64,
    },

    #[error("Compact failed: {0}")]
    CompactFailed(String),

    // === Query Errors ===
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("unknown field id {0}")]
    UnknownField(FieldId),

    #[error("operator {op:?} is not defined for field {field} of type {field_type}")]
    UnsupportedOperator {
        field: FieldId,
        op: Operator,
        field_type: FieldType,
    },

    #[error("type mismatch on field {field}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: FieldId,
        expected: FieldType,
        actual: FieldType,
    },

    // === Codec Errors ===
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    // === Record Errors ===
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("version mismatch for {entity}: node has {expected}, message has {actual}")]
    VersionMismatch {
        entity: String,
        expected: u32,
        actual: u32,
    },

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("field {0} is immutable")]
    ImmutableField(FieldId),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // === Network Errors ===
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("remote error: {0}")]
    Remote(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::ConnectionRefused(_))
    }

    /// Is this a transport failure, as opposed to a bad request?
    ///
    /// Request-level failures (storage, query, decode of a record) are
    /// reported in the response and the connection keeps serving.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::EmptyFrame
                | Error::FrameTooLarge { .. }
                | Error::Timeout(_)
                | Error::Protocol(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::Internal(format!("lock poisoned: {}", e))
    }
}
