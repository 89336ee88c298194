//! Background compaction of every entity log

use super::entity::Registry;
use crate::common::format_bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Compactor {
    registry: Arc<Registry>,
    interval: Duration,
}

impl Compactor {
    pub fn new(registry: Arc<Registry>, interval_secs: u64) -> Self {
        Self {
            registry,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Compact on every tick until the task is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let registry = Arc::clone(&self.registry);
                match tokio::task::spawn_blocking(move || registry.compact_all()).await {
                    Ok(reports) => {
                        let freed: u64 = reports.iter().map(|(_, r)| r.bytes_freed()).sum();
                        let rewritten = reports.iter().filter(|(_, r)| r.rewritten).count();
                        if rewritten > 0 {
                            tracing::info!(
                                "Background compaction rewrote {} logs, freed {}",
                                rewritten,
                                format_bytes(freed)
                            );
                        }
                    }
                    Err(e) => tracing::error!("Compaction task failed: {}", e),
                }
            }
        })
    }
}
