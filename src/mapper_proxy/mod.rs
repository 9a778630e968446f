//! Mapper proxy - the single egress path to the mapper.
//!
//! Outbound Requests, Pushes and tag packets all leave the agent through a
//! [`MapperProxy`]. Requests and tag queries record a completion keyed by
//! their token; when the matching Result comes back on the agent's queue the
//! runtime hands it to [`MapperProxy::handle_result`], which removes the entry
//! and fires the completion exactly once. Entries that outlive their deadline
//! are expired by [`MapperProxy::expire_pending`], normally driven by a
//! [`PendingSweeper`].
//!
//! The proxy is a cheap cloneable handle. It starts unattached and is bound
//! to an identity, transport and serializer once via [`MapperProxy::attach`].

mod sweep;

pub use sweep::PendingSweeper;

use crate::broker::{Destination, Transport};
use crate::packets::{Packet, Push, Register, Request, ResultPacket, TagQuery, TagUpdate};
use crate::recovery::with_recovery;
use crate::serializer::Serializer;
use crate::types::{AgentId, Error, MapperConfig, Result, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::Instant;

/// Callback fired with the correlated Result, or with a timeout error.
pub type Completion = Box<dyn FnOnce(Result<ResultPacket>) + Send + 'static>;

/// Per-request options for [`MapperProxy::request`] and [`MapperProxy::push`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the proxy's default `persistent` flag.
    pub persistent: Option<bool>,
    /// Specific agent the mapper should route to.
    pub target: Option<AgentId>,
    /// Route to agents carrying these tags.
    pub tags: Vec<String>,
    /// Overrides the configured request timeout. Ignored for pushes.
    pub timeout: Option<Duration>,
}

/// Options for [`MapperProxy::query_tags`].
#[derive(Debug, Clone, Default)]
pub struct QueryTagsOptions {
    pub tags: Vec<String>,
    pub agent_ids: Vec<AgentId>,
    pub persistent: Option<bool>,
    pub timeout: Option<Duration>,
}

/// Statistics about proxy traffic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProxyStats {
    pub requests_sent: u64,
    pub pushes_sent: u64,
    pub tag_queries_sent: u64,
    pub tag_updates_sent: u64,
    pub registrations_sent: u64,
    /// Results that matched a pending entry.
    pub results_matched: u64,
    /// Results with an unknown token.
    pub results_discarded: u64,
    /// Pending entries completed with a timeout.
    pub expired: u64,
    /// When [`MapperProxy::expire_pending`] last ran.
    pub last_sweep_at: Option<DateTime<Utc>>,
}

/// Binding established by [`MapperProxy::attach`].
#[derive(Debug)]
struct Link {
    identity: AgentId,
    transport: Arc<dyn Transport>,
    serializer: Arc<dyn Serializer>,
}

struct Pending {
    completion: Completion,
    deadline: Instant,
}

struct Inner {
    config: MapperConfig,
    link: OnceLock<Link>,
    pending: Mutex<HashMap<Token, Pending>>,
    stats: RwLock<ProxyStats>,
}

/// Shared handle to the mapper proxy.
#[derive(Clone)]
pub struct MapperProxy {
    inner: Arc<Inner>,
}

impl MapperProxy {
    /// Create an unattached proxy.
    pub fn new(config: MapperConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                link: OnceLock::new(),
                pending: Mutex::new(HashMap::new()),
                stats: RwLock::new(ProxyStats::default()),
            }),
        }
    }

    /// Bind the proxy to the agent's identity and bus. Can only happen once.
    pub fn attach(
        &self,
        identity: AgentId,
        transport: Arc<dyn Transport>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<()> {
        tracing::debug!("Attaching mapper proxy as {}", identity);
        let link = Link {
            identity,
            transport,
            serializer,
        };
        self.inner
            .link
            .set(link)
            .map_err(|_| Error::configuration("mapper proxy is already attached"))
    }

    pub fn is_attached(&self) -> bool {
        self.inner.link.get().is_some()
    }

    /// Identity the proxy sends as, once attached.
    pub fn identity(&self) -> Option<&AgentId> {
        self.inner.link.get().map(|link| &link.identity)
    }

    pub fn config(&self) -> &MapperConfig {
        &self.inner.config
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send a Request to the mapper and call `completion` with its Result.
    ///
    /// Returns the generated token. If publishing fails the pending entry is
    /// discarded and the completion is never called.
    pub async fn request<F>(
        &self,
        type_: impl Into<String>,
        payload: Value,
        options: RequestOptions,
        completion: F,
    ) -> Result<Token>
    where
        F: FnOnce(Result<ResultPacket>) + Send + 'static,
    {
        let link = self.link()?;
        let token = Token::new();
        let packet = Packet::Request(Request {
            type_: type_.into(),
            payload,
            from: link.identity.clone(),
            token: token.clone(),
            reply_to: link.identity.clone(),
            persistent: self.persistent(options.persistent),
            target: options.target,
            tags: options.tags,
        });

        let deadline = self.deadline(options.timeout);
        self.track_and_publish(link, &packet, deadline, Box::new(completion))
            .await?;
        self.inner.stats.write().await.requests_sent += 1;
        Ok(token)
    }

    /// Send a Request and wait for its Result.
    ///
    /// Fails with [`Error::Timeout`] once the request's deadline has been
    /// swept.
    pub async fn request_and_wait(
        &self,
        type_: impl Into<String>,
        payload: Value,
        options: RequestOptions,
    ) -> Result<ResultPacket> {
        let (tx, rx) = oneshot::channel();
        self.request(type_, payload, options, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await?;

        rx.await
            .map_err(|_| Error::cancelled("mapper proxy dropped the pending request"))?
    }

    /// Send a Push. Nothing is tracked.
    pub async fn push(
        &self,
        type_: impl Into<String>,
        payload: Value,
        options: RequestOptions,
    ) -> Result<Token> {
        let link = self.link()?;
        let token = Token::new();
        let packet = Packet::Push(Push {
            type_: type_.into(),
            payload,
            from: link.identity.clone(),
            token: token.clone(),
            persistent: self.persistent(options.persistent),
            target: options.target,
            tags: options.tags,
        });

        Self::publish(link, &packet, Destination::request()).await?;
        self.inner.stats.write().await.pushes_sent += 1;
        Ok(token)
    }

    /// Ask the mapper which agents match `options`. Tracked like a Request.
    pub async fn query_tags<F>(&self, options: QueryTagsOptions, completion: F) -> Result<Token>
    where
        F: FnOnce(Result<ResultPacket>) + Send + 'static,
    {
        let link = self.link()?;
        let token = Token::new();
        let packet = Packet::TagQuery(TagQuery {
            from: link.identity.clone(),
            token: token.clone(),
            tags: options.tags,
            agent_ids: options.agent_ids,
            persistent: self.persistent(options.persistent),
        });

        let deadline = self.deadline(options.timeout);
        self.track_and_publish(link, &packet, deadline, Box::new(completion))
            .await?;
        self.inner.stats.write().await.tag_queries_sent += 1;
        Ok(token)
    }

    /// Tell the mapper this agent gained and lost tags.
    pub async fn update_tags(
        &self,
        new_tags: Vec<String>,
        obsolete_tags: Vec<String>,
    ) -> Result<()> {
        let link = self.link()?;
        let packet = Packet::TagUpdate(TagUpdate {
            from: link.identity.clone(),
            token: Token::new(),
            new_tags,
            obsolete_tags,
            persistent: self.inner.config.persistent,
        });

        Self::publish(link, &packet, Destination::registration()).await?;
        self.inner.stats.write().await.tag_updates_sent += 1;
        Ok(())
    }

    /// Announce the agent's services and tags on the registration exchange.
    pub async fn register(&self, services: Vec<String>, tags: Vec<String>) -> Result<()> {
        let link = self.link()?;
        let packet = Packet::Register(Register {
            from: link.identity.clone(),
            token: Token::new(),
            services,
            tags,
            persistent: self.inner.config.persistent,
        });

        Self::publish(link, &packet, Destination::registration()).await?;
        self.inner.stats.write().await.registrations_sent += 1;
        tracing::info!("Registered {} with the mapper", link.identity);
        Ok(())
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Complete the pending entry matching `result.token`.
    ///
    /// Returns `false` (and drops the Result) when no entry matches.
    pub async fn handle_result(&self, result: ResultPacket) -> bool {
        let entry = self.inner.pending.lock().await.remove(&result.token);

        let Some(entry) = entry else {
            self.inner.stats.write().await.results_discarded += 1;
            tracing::debug!(
                "Discarding result token={} from {}: no pending request",
                result.token,
                result.from
            );
            return false;
        };

        self.inner.stats.write().await.results_matched += 1;
        let token = result.token.clone();
        run_completion(entry.completion, Ok(result), &token);
        true
    }

    /// Complete every entry past its deadline with a timeout error.
    ///
    /// Returns the number of expired entries.
    pub async fn expire_pending(&self) -> usize {
        self.inner.stats.write().await.last_sweep_at = Some(Utc::now());
        let now = Instant::now();
        let expired: Vec<(Token, Pending)> = {
            let mut pending = self.inner.pending.lock().await;
            let due: Vec<Token> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(token, _)| token.clone())
                .collect();
            due.into_iter()
                .filter_map(|token| pending.remove_entry(&token))
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let count = expired.len();
        self.inner.stats.write().await.expired += count as u64;
        for (token, entry) in expired {
            tracing::warn!("Request token={} timed out waiting for a result", token);
            let timeout = Error::timeout(format!("no result for request {}", token));
            run_completion(entry.completion, Err(timeout), &token);
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    pub async fn is_pending(&self, token: &Token) -> bool {
        self.inner.pending.lock().await.contains_key(token)
    }

    /// Get current proxy statistics.
    pub async fn stats(&self) -> ProxyStats {
        self.inner.stats.read().await.clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn link(&self) -> Result<&Link> {
        self.inner
            .link
            .get()
            .ok_or_else(|| Error::configuration("mapper proxy is not attached"))
    }

    fn persistent(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.inner.config.persistent)
    }

    fn deadline(&self, timeout: Option<Duration>) -> Instant {
        Instant::now() + timeout.unwrap_or(self.inner.config.request_timeout)
    }

    async fn track_and_publish(
        &self,
        link: &Link,
        packet: &Packet,
        deadline: Instant,
        completion: Completion,
    ) -> Result<()> {
        let body = link.serializer.dump(packet)?;
        let token = packet.token().clone();

        // Tracked before publishing so a fast Result always finds its entry
        self.inner.pending.lock().await.insert(
            token.clone(),
            Pending {
                completion,
                deadline,
            },
        );

        if let Err(e) = link
            .transport
            .publish(&Destination::request(), body, packet.persistent())
            .await
        {
            self.inner.pending.lock().await.remove(&token);
            tracing::error!("Failed to publish {} token={}: {}", packet.kind(), token, e);
            return Err(e);
        }

        tracing::debug!(
            "Sent {} {} token={}",
            packet.kind(),
            packet.type_key().unwrap_or_default(),
            token
        );
        Ok(())
    }

    async fn publish(link: &Link, packet: &Packet, destination: Destination) -> Result<()> {
        let body = link.serializer.dump(packet)?;
        link.transport
            .publish(&destination, body, packet.persistent())
            .await?;
        tracing::debug!(
            "Sent {} {} token={} to {}",
            packet.kind(),
            packet.type_key().unwrap_or_default(),
            packet.token(),
            destination
        );
        Ok(())
    }
}

impl fmt::Debug for MapperProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperProxy")
            .field("config", &self.inner.config)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

fn run_completion(completion: Completion, outcome: Result<ResultPacket>, token: &Token) {
    let name = format!("completion for {}", token);
    // with_recovery logs the panic itself
    let _ = with_recovery(
        move || {
            completion(outcome);
            Ok(())
        },
        &name,
    );
}
