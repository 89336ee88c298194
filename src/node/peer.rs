//! Outbound peer links
//!
//! A node dials every configured peer, retrying on connection refused, and
//! proves the link with a `Test` round-trip. Links carry no replication.

use crate::common::{retry_with_backoff, Error, NetworkConfig, Result};
use crate::net::{Client, ECHO_SUFFIX};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Dial one peer and complete the handshake.
pub async fn dial(addr: &str, node_name: &str, network: &NetworkConfig) -> Result<Client> {
    let client = retry_with_backoff(
        || Client::connect(addr.to_string()),
        network.connect_attempts,
        network.connect_backoff(),
    )
    .await?;

    let mut client = client
        .with_timeout(network.request_timeout())
        .with_max_frame(network.max_frame_bytes);

    let echo = client.ping(node_name).await?;
    let expected = format!("{}{}", node_name, ECHO_SUFFIX);
    if echo != expected {
        return Err(Error::Protocol(format!(
            "peer {} answered handshake with {:?}",
            addr, echo
        )));
    }

    tracing::info!("Peer link to {} established", client.peer());
    Ok(client)
}

/// Established links, by peer address
#[derive(Clone, Default)]
pub struct PeerSet {
    links: Arc<Mutex<BTreeMap<String, Client>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dial every peer in the background.
    pub fn spawn_dialers(
        &self,
        peers: &[String],
        node_name: &str,
        network: &NetworkConfig,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        peers
            .iter()
            .map(|addr| {
                let set = self.clone();
                let addr = addr.clone();
                let node_name = node_name.to_string();
                let network = network.clone();
                tokio::spawn(async move {
                    match dial(&addr, &node_name, &network).await {
                        Ok(client) => set.insert(addr, client),
                        Err(e) => tracing::warn!("Could not reach peer {}: {}", addr, e),
                    }
                })
            })
            .collect()
    }

    fn insert(&self, addr: String, client: Client) {
        match self.links.lock() {
            Ok(mut links) => {
                links.insert(addr, client);
            }
            Err(e) => tracing::warn!("Peer set poisoned: {}", e),
        }
    }

    /// Addresses of peers with a completed handshake
    pub fn connected(&self) -> Vec<String> {
        self.links
            .lock()
            .map(|links| links.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut links) = self.links.lock() {
            links.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_dial_gives_up_after_attempts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let network = NetworkConfig {
            connect_attempts: 3,
            connect_backoff_ms: 20,
            ..NetworkConfig::default()
        };

        let started = Instant::now();
        let result = dial(&addr, "me", &network).await;
        assert!(matches!(result, Err(Error::ConnectionRefused(_))));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
