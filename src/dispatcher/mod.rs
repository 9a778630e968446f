//! Dispatcher - routes inbound deliverables to actor operations.
//!
//! Each call to [`Dispatcher::dispatch`] is an independent transaction:
//! resolve the operation, execute it (inline or on the worker pool), turn
//! any failure into a formatted error, and, for packets that expect a reply,
//! publish a correlated Result to the requester's queue. Nothing raised by an
//! operation escapes `dispatch`.

mod pool;

pub use pool::WorkerPool;

use crate::actors::{Actor, ActorRegistry, HandlerError, Operation};
use crate::broker::{Destination, Transport};
use crate::cache::LruCache;
use crate::packets::{split_type, OperationResult, Packet, ResultPacket};
use crate::recovery::guard_handler;
use crate::serializer::Serializer;
use crate::types::{AgentId, DispatcherConfig, Result, Token};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Statistics about dispatch activity.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Operations that returned a value.
    pub succeeded: u64,
    /// Operations that returned an error or panicked.
    pub failed: u64,
    /// Deliverables with no matching actor or operation.
    pub unroutable: u64,
    /// Redelivered requests answered from the duplicate cache or dropped.
    pub duplicates: u64,
    /// Result packets published.
    pub replies_published: u64,
}

/// State of a request token in the duplicate cache.
enum Admission {
    Fresh,
    InFlight,
    Completed(OperationResult),
}

/// Request tokens seen by this dispatcher.
///
/// Running tokens are never evicted; only finished results live in the
/// bounded LRU.
#[derive(Debug)]
struct SeenTokens {
    running: HashSet<Token>,
    completed: LruCache<Token, OperationResult>,
}

impl SeenTokens {
    fn new(capacity: usize) -> Self {
        Self {
            running: HashSet::new(),
            completed: LruCache::new(capacity),
        }
    }

    fn finish(&mut self, token: &Token, outcome: OperationResult) {
        self.running.remove(token);
        self.completed.put(token.clone(), outcome);
    }
}

/// Routes deliverables to operations and publishes correlated Results.
#[derive(Debug)]
pub struct Dispatcher {
    identity: AgentId,
    registry: Arc<ActorRegistry>,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
    /// `None` runs every operation inline.
    pool: Option<WorkerPool>,
    seen: Mutex<SeenTokens>,
    stats: RwLock<DispatcherStats>,
}

impl Dispatcher {
    pub fn new(
        identity: AgentId,
        registry: Arc<ActorRegistry>,
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn Serializer>,
        config: &DispatcherConfig,
    ) -> Result<Self> {
        let pool = if config.uses_pool() {
            Some(WorkerPool::new(
                config.threadpool_size,
                config.job_queue_capacity,
            )?)
        } else {
            None
        };

        Ok(Self {
            identity,
            registry,
            transport,
            serializer,
            pool,
            seen: Mutex::new(SeenTokens::new(config.duplicate_cache_capacity)),
            stats: RwLock::new(DispatcherStats::default()),
        })
    }

    pub fn identity(&self) -> &AgentId {
        &self.identity
    }

    /// Whether operations are offloaded to worker threads.
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }

    /// Dispatch one deliverable and return its outcome.
    ///
    /// The returned value mirrors what was (or would have been) sent back;
    /// for Pushes and other fire-and-forget packets it is only informational.
    pub async fn dispatch(&self, deliverable: Packet) -> OperationResult {
        let Some(type_key) = deliverable.type_key().map(str::to_string) else {
            tracing::warn!(
                "Dropping {} token={}: not dispatchable",
                deliverable.kind(),
                deliverable.token()
            );
            return OperationResult::non_delivery(format!(
                "{} packets are not dispatchable",
                deliverable.kind()
            ));
        };

        let expects_reply = deliverable.expects_reply();
        if expects_reply {
            match self.admit(deliverable.token()).await {
                Admission::Fresh => {}
                Admission::InFlight => {
                    self.stats.write().await.duplicates += 1;
                    tracing::debug!(
                        "Ignoring redelivered {} token={} still in progress",
                        type_key,
                        deliverable.token()
                    );
                    return OperationResult::non_delivery(format!(
                        "duplicate of in-progress request {}",
                        deliverable.token()
                    ));
                }
                Admission::Completed(previous) => {
                    self.stats.write().await.duplicates += 1;
                    tracing::debug!(
                        "Answering redelivered {} token={} from cache",
                        type_key,
                        deliverable.token()
                    );
                    self.reply(&deliverable, previous.clone()).await;
                    return previous;
                }
            }
        }

        let (_, method) = split_type(&type_key);
        let outcome = match self.registry.resolve(&type_key) {
            Ok((actor, operation)) => self.execute(&actor, operation, method, &deliverable).await,
            Err(e) => {
                self.stats.write().await.unroutable += 1;
                if expects_reply {
                    tracing::warn!(
                        "Rejecting {} {} from {}: {}",
                        deliverable.kind(),
                        type_key,
                        deliverable.sender(),
                        e
                    );
                } else {
                    tracing::warn!(
                        "Dropping {} {} from {}: {}",
                        deliverable.kind(),
                        type_key,
                        deliverable.sender(),
                        e
                    );
                }
                OperationResult::non_delivery(e.to_string())
            }
        };

        if expects_reply {
            self.seen
                .lock()
                .await
                .finish(deliverable.token(), outcome.clone());
            self.reply(&deliverable, outcome.clone()).await;
        }

        outcome
    }

    /// Get current dispatch statistics.
    pub async fn stats(&self) -> DispatcherStats {
        self.stats.read().await.clone()
    }

    async fn admit(&self, token: &Token) -> Admission {
        let mut seen = self.seen.lock().await;
        if seen.running.contains(token) {
            return Admission::InFlight;
        }
        if let Some(result) = seen.completed.get(token) {
            return Admission::Completed(result.clone());
        }
        seen.running.insert(token.clone());
        Admission::Fresh
    }

    async fn execute(
        &self,
        actor: &Actor,
        operation: Operation,
        method: &str,
        deliverable: &Packet,
    ) -> OperationResult {
        let payload = deliverable.payload();

        let result = match &self.pool {
            Some(pool) => {
                let packet = deliverable.clone();
                pool.run(move || guard_handler(|| operation.invoke(payload, &packet)))
                    .await
                    .unwrap_or_else(|e| Err(HandlerError::new("DispatchError", e.to_string())))
            }
            None => {
                tokio::task::yield_now().await;
                guard_handler(|| operation.invoke(payload, deliverable))
            }
        };

        match result {
            Ok(value) => {
                self.stats.write().await.succeeded += 1;
                tracing::debug!(
                    "Dispatched /{}/{} token={}",
                    actor.prefix(),
                    method,
                    deliverable.token()
                );
                OperationResult::success(value)
            }
            Err(err) => {
                self.stats.write().await.failed += 1;
                let formatted = err.formatted();
                tracing::error!(
                    "Failed to dispatch /{}/{} token={}: {}",
                    actor.prefix(),
                    method,
                    deliverable.token(),
                    formatted
                );
                notify_observer(actor, method, deliverable, &err);
                OperationResult::error(formatted)
            }
        }
    }

    async fn reply(&self, deliverable: &Packet, results: OperationResult) {
        let Some(reply_to) = deliverable.reply_to() else {
            return;
        };

        let persistent = deliverable.persistent();
        let packet = Packet::Result(ResultPacket {
            token: deliverable.token().clone(),
            to: reply_to.clone(),
            results,
            from: self.identity.clone(),
            persistent,
        });

        let body = match self.serializer.dump(&packet) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    "Failed to encode result token={}: {}",
                    deliverable.token(),
                    e
                );
                return;
            }
        };

        match self
            .transport
            .publish(&Destination::direct(reply_to.as_str()), body, persistent)
            .await
        {
            Ok(delivered) => {
                self.stats.write().await.replies_published += 1;
                if delivered == 0 {
                    tracing::debug!(
                        "Result token={} for {} had no consumer",
                        deliverable.token(),
                        reply_to
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to publish result token={} to {}: {}",
                    deliverable.token(),
                    reply_to,
                    e
                );
            }
        }
    }
}

/// Invoke the actor's failure observer; its own failures are only logged.
fn notify_observer(actor: &Actor, method: &str, deliverable: &Packet, error: &HandlerError) {
    let Some(observer) = actor.failure_observer() else {
        return;
    };
    if let Err(observer_err) = guard_handler(|| observer.on_failure(method, deliverable, error)) {
        tracing::error!(
            "Failure observer for /{}/{} failed: {}",
            actor.prefix(),
            method,
            observer_err.formatted()
        );
    }
}
