//! Common utilities and types shared across keeldb

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{
    EntityConfig, FieldConfig, FlushPolicy, HostConfig, IndexKind, NetworkConfig, NodeConfig,
    PathConfig, StorageConfig,
};
pub use error::{Error, Result};
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use utils::{format_bytes, retry_with_backoff};
