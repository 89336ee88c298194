//! Message envelope exchanged between clients and nodes
//!
//! One `Message` travels per frame, bincode-encoded. Requests leave
//! `response` pending; the node fills it in and sends the same envelope
//! back.

use crate::common::{Error, Result};
use crate::model::Record;
use crate::query::Query;
use serde::{Deserialize, Serialize};

/// Appended by the node to the echo string of a `Test` message
pub const ECHO_SUFFIX: &str = " (ack)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Test,
    Insert,
    Update,
    Delete,
    GetAll,
    Query,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Test,
        MessageKind::Insert,
        MessageKind::Update,
        MessageKind::Delete,
        MessageKind::GetAll,
        MessageKind::Query,
    ];

    /// Position in [`MessageKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Test => "test",
            MessageKind::Insert => "insert",
            MessageKind::Update => "update",
            MessageKind::Delete => "delete",
            MessageKind::GetAll => "get_all",
            MessageKind::Query => "query",
        }
    }

    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            MessageKind::Insert | MessageKind::Update | MessageKind::Delete
        )
    }
}

/// Delivery mode. Only synchronous request/reply is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Pending,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub error: String,
    /// Encoded records
    pub models: Vec<Vec<u8>>,
    pub echo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub mode: Mode,
    /// Record type name
    pub entity: String,
    /// Record type version
    pub version: u32,
    /// Encoded record of a mutation
    pub record: Vec<u8>,
    pub query: Option<Query>,
    pub echo: String,
    pub response: Response,
}

impl Message {
    fn new(kind: MessageKind, entity: impl Into<String>, version: u32) -> Self {
        Self {
            kind,
            mode: Mode::Sync,
            entity: entity.into(),
            version,
            record: Vec::new(),
            query: None,
            echo: String::new(),
            response: Response::default(),
        }
    }

    /// Handshake / liveness probe
    pub fn test(echo: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageKind::Test, "", 0);
        msg.echo = echo.into();
        msg
    }

    pub fn insert(record: &Record) -> Result<Self> {
        Self::mutation(MessageKind::Insert, record)
    }

    pub fn update(record: &Record) -> Result<Self> {
        Self::mutation(MessageKind::Update, record)
    }

    pub fn delete(record: &Record) -> Result<Self> {
        Self::mutation(MessageKind::Delete, record)
    }

    fn mutation(kind: MessageKind, record: &Record) -> Result<Self> {
        let schema = record.schema();
        let mut msg = Self::new(kind, schema.name(), schema.version());
        msg.record = record.encode()?;
        Ok(msg)
    }

    pub fn get_all(entity: impl Into<String>, version: u32) -> Self {
        Self::new(MessageKind::GetAll, entity, version)
    }

    pub fn query(entity: impl Into<String>, version: u32, query: Query) -> Self {
        let mut msg = Self::new(MessageKind::Query, entity, version);
        msg.query = Some(query);
        msg
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Decode(format!("message: {}", e)))
    }

    /// Mark the response successful.
    pub fn ok(&mut self) {
        self.response.status = Status::Ok;
        self.response.error.clear();
    }

    /// Mark the response failed.
    pub fn fail(&mut self, err: &Error) {
        self.response.status = Status::Error;
        self.response.error = err.to_string();
        self.response.models.clear();
    }

    /// Turn a failed response into [`Error::Remote`].
    pub fn into_result(self) -> Result<Self> {
        match self.response.status {
            Status::Ok => Ok(self),
            Status::Error => Err(Error::Remote(self.response.error)),
            Status::Pending => Err(Error::Protocol(format!(
                "{} reply without a status",
                self.kind.as_str()
            ))),
        }
    }
}
