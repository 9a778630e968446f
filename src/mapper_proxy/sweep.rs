//! Background expiry of pending mapper requests.

use super::MapperProxy;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

/// Periodically calls [`MapperProxy::expire_pending`].
#[derive(Debug)]
pub struct PendingSweeper {
    proxy: MapperProxy,
    every: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl PendingSweeper {
    pub fn new(proxy: MapperProxy, every: Duration) -> Self {
        Self {
            proxy,
            every,
            stop_tx: None,
        }
    }

    /// Start the sweep loop in the background.
    /// Returns immediately; sweeping runs in a spawned task.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let proxy = self.proxy.clone();
        let every = self.every;
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = proxy.expire_pending().await;
                        if expired > 0 {
                            tracing::debug!("pending_sweep_completed: expired={}", expired);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("pending_sweeper_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sweep loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for PendingSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::mapper_proxy::RequestOptions;
    use crate::serializer::JsonSerializer;
    use crate::types::{AgentId, MapperConfig};
    use serde_json::Value;
    use std::sync::Arc;

    fn proxy(timeout: Duration) -> MapperProxy {
        let proxy = MapperProxy::new(MapperConfig {
            request_timeout: timeout,
            ..Default::default()
        });
        proxy
            .attach(
                AgentId::must("rs-agent-1"),
                Arc::new(InMemoryBroker::new()),
                Arc::new(JsonSerializer),
            )
            .unwrap();
        proxy
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_overdue_requests() {
        let proxy = proxy(Duration::from_secs(2));
        let (tx, rx) = oneshot::channel();
        proxy
            .request("/a/b", Value::Null, RequestOptions::default(), move |outcome| {
                let _ = tx.send(outcome);
            })
            .await
            .unwrap();

        let mut sweeper = PendingSweeper::new(proxy.clone(), Duration::from_secs(1));
        let handle = sweeper.start();
        assert!(sweeper.is_running());

        let outcome = rx.await.unwrap();
        assert!(outcome.unwrap_err().is_timeout());
        assert_eq!(proxy.pending_count().await, 0);

        sweeper.stop();
        handle.await.unwrap();
        assert!(!sweeper.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_leaves_fresh_requests() {
        let proxy = proxy(Duration::from_secs(60));
        proxy
            .request("/a/b", Value::Null, RequestOptions::default(), |_| {})
            .await
            .unwrap();

        let mut sweeper = PendingSweeper::new(proxy.clone(), Duration::from_secs(1));
        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(proxy.pending_count().await, 1);

        sweeper.stop();
        handle.await.unwrap();
    }
}
