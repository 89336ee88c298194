//! Node server

use super::compactor::Compactor;
use super::dispatch;
use super::entity::{Entity, Registry};
use super::peer::PeerSet;
use crate::common::{Error, NetworkConfig, NodeConfig, NodeMetrics, Result};
use crate::model::Schema;
use crate::net::frame::HEADER_LEN;
use crate::net::{read_frame, write_frame, Message, Status};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// A keeldb node: the entity registry plus its listener
#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    registry: Arc<Registry>,
    metrics: Arc<NodeMetrics>,
    peers: PeerSet,
}

impl Node {
    /// Open every entity and rebuild its snapshot from the log.
    ///
    /// A schema passed in `schemas` takes precedence over the one built
    /// from the configured fields of the same entity. Schemas not named in
    /// the configuration are served as well.
    pub fn open(config: NodeConfig, schemas: Vec<Arc<Schema>>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path.data)?;

        let mut resolved: BTreeMap<String, Arc<Schema>> = BTreeMap::new();
        for entity in &config.entities {
            if entity.fields.is_empty() && !schemas.iter().any(|s| s.name() == entity.name) {
                return Err(Error::InvalidConfig(format!(
                    "entity {} has no fields and no registered schema",
                    entity.name
                )));
            }
            if !entity.fields.is_empty() {
                resolved.insert(entity.name.clone(), Arc::new(entity.to_schema()?));
            }
        }
        for schema in schemas {
            resolved.insert(schema.name().to_string(), schema);
        }

        let mut registry = Registry::new();
        for (name, schema) in resolved {
            let path = config.log_path(&name);
            registry.register(Entity::open(schema, path, &config.storage)?)?;
        }

        tracing::info!(
            "Node {} opened {} entities in {}",
            config.host.name,
            registry.len(),
            config.path.data.display()
        );

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            metrics: Arc::new(NodeMetrics::new()),
            peers: PeerSet::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn entity(&self, name: &str) -> Result<Arc<Entity>> {
        self.registry.get(name)
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    /// Peers with a completed handshake
    pub fn connected_peers(&self) -> Vec<String> {
        self.peers.connected()
    }

    /// Bind `host.ip:host.port` and serve until Ctrl-C.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.host.socket_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Node {} listening on {}", self.config.host.name, addr);

        self.run_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to install Ctrl-C handler: {}", e);
            }
        })
        .await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn run_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut background = self.peers.spawn_dialers(
            &self.config.peers,
            &self.config.host.name,
            &self.config.network,
        );
        if let Some(secs) = self.config.storage.compact_interval_secs {
            background.push(Compactor::new(self.registry.clone(), secs).start());
        }

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn = Connection {
                            registry: self.registry.clone(),
                            metrics: self.metrics.clone(),
                            network: self.config.network.clone(),
                            peer,
                        };
                        connections.spawn(conn.run(stream));
                    }
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        tracing::info!("Node {} shutting down", self.config.host.name);
        connections.abort_all();
        while connections.join_next().await.is_some() {}
        for task in background {
            task.abort();
        }
        self.peers.clear();
        self.registry.sync_all();

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            "Served {} requests ({} failed) over {} connections in {}s",
            snapshot.requests_total,
            snapshot.errors_total,
            snapshot.connections_total,
            snapshot.uptime_secs
        );
        match serde_json::to_string(&snapshot) {
            Ok(json) => tracing::debug!("Final metrics: {}", json),
            Err(e) => tracing::warn!("Failed to encode metrics snapshot: {}", e),
        }
        Ok(())
    }
}

/// One accepted client or peer connection
struct Connection {
    registry: Arc<Registry>,
    metrics: Arc<NodeMetrics>,
    network: NetworkConfig,
    peer: SocketAddr,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        self.metrics.connections_total.inc();
        let _active = ActiveGuard::new(self.metrics.clone());
        tracing::debug!("Connection from {}", self.peer);

        match self.serve(stream).await {
            Ok(()) => tracing::debug!("{} disconnected", self.peer),
            Err(e) if e.closes_connection() => {
                tracing::warn!("Closing connection from {}: {}", self.peer, e)
            }
            Err(e) => tracing::error!("Dropping connection from {}: {}", self.peer, e),
        }
    }

    /// Serve requests one at a time until EOF or a fatal error.
    async fn serve(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let frame = match read_frame(
                &mut stream,
                self.network.idle_timeout(),
                self.network.max_frame_bytes,
            )
            .await?
            {
                Some(frame) => frame,
                None => return Ok(()),
            };
            self.metrics.bytes_read.add(frame.len() as u64 + HEADER_LEN as u64);

            let request = decode_request(&frame)?;
            let kind = request.kind;
            let started = Instant::now();

            let registry = self.registry.clone();
            let reply = tokio::task::spawn_blocking(move || dispatch::handle(&registry, request))
                .await
                .map_err(|e| Error::Internal(format!("dispatch task failed: {}", e)))?;

            self.metrics.record_request(
                kind,
                started.elapsed(),
                reply.response.status == Status::Ok,
            );

            let bytes = reply.to_bytes()?;
            write_frame(&mut stream, &bytes).await?;
            self.metrics.bytes_written.add(bytes.len() as u64 + HEADER_LEN as u64);
        }
    }
}

/// Decode a request envelope. A frame that is not an envelope is a
/// protocol fault, like a malformed frame.
fn decode_request(frame: &[u8]) -> Result<Message> {
    Message::from_bytes(frame).map_err(|e| Error::Protocol(format!("bad envelope: {}", e)))
}

/// Keeps the active-connections gauge right even when a task is aborted
struct ActiveGuard(Arc<NodeMetrics>);

impl ActiveGuard {
    fn new(metrics: Arc<NodeMetrics>) -> Self {
        metrics.active_connections.inc();
        Self(metrics)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_connections.dec();
    }
}
