//! # keeldb
//!
//! An embeddable, process-resident record store:
//! - one append-only log per record type, with tombstones and compaction
//! - an in-memory snapshot with hash and sorted secondary indexes
//! - filtered and ordered queries with index-aware planning
//! - a length-prefixed binary protocol between clients and nodes
//!
//! ## Architecture
//!
//! ```text
//!   client ──frame──▶ Node ──▶ dispatch ──▶ Entity (one per record type)
//!                                             ├─ IndexedStore  (memory)
//!                                             └─ LogStore      (<data>/<entity>.log)
//! ```
//!
//! Mutations update the indexed snapshot, then append to the log. On
//! startup each log is (optionally) compacted and replayed into its
//! snapshot.
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! keeldb-node --config node-a.json
//! ```
//!
//! ### Use the CLI
//! ```bash
//! keeldb --addr 127.0.0.1:7400 ping
//! keeldb --addr 127.0.0.1:7400 --config node-a.json insert user '{"email": "a@b.c"}'
//! keeldb --addr 127.0.0.1:7400 --config node-a.json query user '{"orders": [{"field": 3}]}'
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod model;
pub mod net;
pub mod node;
pub mod query;
pub mod storage;

// Re-export commonly used types
pub use common::{Error, NodeConfig, Result};
pub use model::{FieldType, Record, Schema, Value};
pub use net::{Client, Message};
pub use node::Node;
pub use query::{Direction, Filter, Operator, Query};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
