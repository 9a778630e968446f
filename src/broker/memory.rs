//! In-process broker with fanout exchanges and direct queues.
//!
//! Stands in for the external bus in tests, benches and the loopback binary.
//! Durability is not modelled; the `persistent` flag is carried through to
//! the [`Delivery`] so consumers can assert on it.

use super::{Delivery, Destination, Transport};
use crate::types::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Statistics about broker usage.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BrokerStats {
    pub fanout_published: u64,
    pub direct_published: u64,
    /// Direct messages with no live consumer.
    pub unroutable: u64,
    pub declared_queues: usize,
}

/// In-memory bus.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    /// Fanout subscribers: exchange -> subscribers
    fanouts: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>>>,

    /// Direct queues: queue name -> consumer channel
    queues: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Delivery>>>>,

    /// Cleared while simulating a broker outage.
    connected: Arc<AtomicBool>,

    stats: Arc<RwLock<BrokerStats>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            fanouts: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(RwLock::new(BrokerStats::default())),
        }
    }

    // =========================================================================
    // Fanout
    // =========================================================================

    /// Subscribe to a fanout exchange.
    ///
    /// Dropping the receiver ends the subscription.
    pub async fn subscribe(
        &self,
        exchange: &str,
        subscriber_id: &str,
    ) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.fanouts
            .write()
            .await
            .entry(exchange.to_string())
            .or_default()
            .push(tx);

        tracing::debug!("Subscriber {} bound to exchange {}", subscriber_id, exchange);
        rx
    }

    // =========================================================================
    // Direct queues
    // =========================================================================

    /// Declare a direct queue and take its consumer end.
    ///
    /// A name can be redeclared once the previous consumer has been dropped.
    pub async fn declare_queue(
        &self,
        name: &str,
    ) -> Result<mpsc::UnboundedReceiver<Delivery>> {
        let mut queues = self.queues.write().await;

        if let Some(existing) = queues.get(name) {
            if !existing.is_closed() {
                return Err(Error::validation(format!(
                    "Queue already has a consumer: {}",
                    name
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(name.to_string(), tx);

        let mut stats = self.stats.write().await;
        stats.declared_queues = queues.len();

        tracing::debug!("Declared queue: {}", name);

        Ok(rx)
    }

    /// Delete a direct queue.
    pub async fn delete_queue(&self, name: &str) {
        let mut queues = self.queues.write().await;
        queues.remove(name);

        let mut stats = self.stats.write().await;
        stats.declared_queues = queues.len();

        tracing::debug!("Deleted queue: {}", name);
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Simulate losing the broker connection; publishes fail until
    /// [`reconnect`](Self::reconnect).
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::warn!("Broker connection lost");
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Broker connection restored");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get current broker statistics.
    pub async fn get_stats(&self) -> BrokerStats {
        self.stats.read().await.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn publish(
        &self,
        destination: &Destination,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::internal(format!(
                "Broker unavailable, cannot publish to {}",
                destination
            )));
        }

        let delivery = Delivery {
            body: Bytes::from(body),
            persistent,
        };

        match destination {
            Destination::Fanout(exchange) => {
                let fanouts = self.fanouts.read().await;
                let interested = fanouts
                    .get(exchange)
                    .map(|subs| subs.as_slice())
                    .unwrap_or(&[]);

                let mut delivered = 0;
                for subscriber in interested {
                    // Closed channels belong to subscribers that went away
                    if subscriber.send(delivery.clone()).is_ok() {
                        delivered += 1;
                    }
                }

                let mut stats = self.stats.write().await;
                stats.fanout_published += 1;

                tracing::debug!(
                    "Published to exchange={} subscribers={}",
                    exchange,
                    delivered
                );
                Ok(delivered)
            }
            Destination::Direct(queue) => {
                let queues = self.queues.read().await;
                let delivered = match queues.get(queue) {
                    Some(tx) => usize::from(tx.send(delivery).is_ok()),
                    None => 0,
                };

                let mut stats = self.stats.write().await;
                stats.direct_published += 1;
                if delivered == 0 {
                    stats.unroutable += 1;
                    tracing::debug!("Dropped unroutable message for queue={}", queue);
                }
                Ok(delivered)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
