//! Configuration for keeldb nodes

use crate::common::{Error, Result};
use crate::model::{FieldId, FieldType, Schema};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity and listen address
    pub host: HostConfig,

    /// Where the per-entity logs live
    pub path: PathConfig,

    /// Record types served by this node
    #[serde(default)]
    pub entities: Vec<EntityConfig>,

    /// Peer node addresses to connect out to
    #[serde(default)]
    pub peers: Vec<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Node name (used in peer handshakes and logs)
    pub name: String,

    #[serde(default = "default_ip")]
    pub ip: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_port() -> u16 {
    7400
}

impl HostConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Data directory (one `<entity>.log` per record type)
    pub data: PathBuf,
}

/// A record type served by the node.
///
/// `fields` may be left empty when the schema is registered in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,

    #[serde(default = "default_entity_version")]
    pub version: u32,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

fn default_entity_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub id: FieldId,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub index: IndexKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    None,
    Hash,
    Sorted,
}

impl EntityConfig {
    /// Build a schema descriptor from the declared fields.
    pub fn to_schema(&self) -> Result<Schema> {
        let mut fields = self.fields.clone();
        fields.sort_by_key(|f| f.id);

        let mut builder = Schema::builder(&self.name, self.version);
        for field in &fields {
            builder = builder.field(field.id, &field.name, field.field_type);
            builder = match field.index {
                IndexKind::None => builder,
                IndexKind::Hash => builder.indexed(),
                IndexKind::Sorted => builder.sorted(),
            };
        }
        builder.build()
    }
}

/// Log flush policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushPolicy {
    /// Flush and sync after every append
    Always,
    /// Flush from a background timer
    Interval,
    /// Flush only on read, compaction or close
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_flush_policy")]
    pub flush_policy: FlushPolicy,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Compact every log before replaying it
    #[serde(default = "default_compact_on_startup")]
    pub compact_on_startup: bool,

    /// Background compaction period (disabled if unset)
    #[serde(default)]
    pub compact_interval_secs: Option<u64>,
}

fn default_flush_policy() -> FlushPolicy {
    FlushPolicy::Interval
}
fn default_flush_interval() -> u64 {
    1000
}
fn default_compact_on_startup() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            flush_policy: default_flush_policy(),
            flush_interval_ms: default_flush_interval(),
            compact_on_startup: default_compact_on_startup(),
            compact_interval_secs: None,
        }
    }
}

impl StorageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// A connection with no request for this long is closed
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// Deadline for a reply when acting as a client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,

    /// Fixed delay between peer dial attempts on connection refused
    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_ms: u64,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
}

fn default_idle_timeout() -> u64 {
    300_000
}
fn default_request_timeout() -> u64 {
    10_000
}
fn default_max_frame_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_connect_backoff() -> u64 {
    500
}
fn default_connect_attempts() -> usize {
    20
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
            request_timeout_ms: default_request_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
            connect_backoff_ms: default_connect_backoff(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

impl NetworkConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

impl NodeConfig {
    /// Minimal configuration for a node with the given name and data directory.
    pub fn new(name: impl Into<String>, data: impl Into<PathBuf>) -> Self {
        Self {
            host: HostConfig {
                name: name.into(),
                ip: default_ip(),
                port: default_port(),
            },
            path: PathConfig { data: data.into() },
            entities: Vec::new(),
            peers: Vec::new(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a JSON or TOML file, with `KEELDB__` env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(::config::Environment::with_prefix("KEELDB").separator("__"))
            .build()?;
        let config: NodeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document directly.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.name.is_empty() {
            return Err(Error::InvalidConfig("host.name cannot be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for entity in &self.entities {
            if entity.name.is_empty() {
                return Err(Error::InvalidConfig("entity name cannot be empty".into()));
            }
            if !seen.insert(entity.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "entity {} declared twice",
                    entity.name
                )));
            }
        }
        if self.storage.flush_policy == FlushPolicy::Interval && self.storage.flush_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "storage.flush_interval_ms must be > 0 with the interval policy".into(),
            ));
        }
        if self.network.max_frame_bytes == 0 {
            return Err(Error::InvalidConfig("network.max_frame_bytes must be > 0".into()));
        }
        Ok(())
    }

    /// Path of the log file for an entity
    pub fn log_path(&self, entity: &str) -> PathBuf {
        self.path.data.join(format!("{}.log", entity))
    }
}
