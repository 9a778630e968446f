//! Agent runtime - the loop that owns the agent's inbound queue.
//!
//! Each delivery is decoded, checked against the [`SecurityProvider`], and
//! then either handed to the [`MapperProxy`] (Results) or dispatched. With a
//! worker pool configured dispatches run concurrently on a [`JoinSet`],
//! bounded by a semaphore so a saturated pool stops the loop from reading
//! further deliveries. Otherwise they are awaited one at a time in delivery
//! order.

use crate::actors::{agent_manager, ActorRegistry};
use crate::broker::{Delivery, Transport};
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::mapper_proxy::{MapperProxy, PendingSweeper, ProxyStats};
use crate::packets::Packet;
use crate::security::{self, SecurityProvider};
use crate::serializer::{self, Serializer};
use crate::types::{AgentId, Config, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Statistics about inbound traffic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AgentStats {
    pub received: u64,
    pub undecodable: u64,
    pub denied: u64,
    pub results: u64,
    pub dispatched: u64,
    /// When [`Agent::start`] announced the agent.
    pub started_at: Option<DateTime<Utc>>,
}

/// A running agent: dispatcher, mapper proxy and inbound loop.
#[derive(Debug)]
pub struct Agent {
    identity: AgentId,
    tags: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    proxy: MapperProxy,
    serializer: Arc<dyn Serializer>,
    security: Arc<dyn SecurityProvider>,
    sweep_interval: Duration,
    sweeper: Option<(PendingSweeper, JoinHandle<()>)>,
    /// Permits for concurrent pooled dispatches.
    admission: Arc<Semaphore>,
    cancel: CancellationToken,
    stats: RwLock<AgentStats>,
}

impl Agent {
    /// Build an agent with a fresh mapper proxy.
    pub fn new(
        config: &Config,
        registry: ActorRegistry,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityProvider>,
    ) -> Result<Self> {
        let proxy = MapperProxy::new(config.mapper.clone());
        Self::with_proxy(config, registry, transport, security, proxy)
    }

    /// Build an agent around an existing, unattached proxy.
    ///
    /// Lets actors capture a proxy handle before the agent exists.
    pub fn with_proxy(
        config: &Config,
        mut registry: ActorRegistry,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityProvider>,
        proxy: MapperProxy,
    ) -> Result<Self> {
        config.validate()?;
        let identity = config.identity()?;
        let serializer = serializer::from_format(config.serializer.format);

        if registry.actor_for(agent_manager::PREFIX).is_err() {
            registry.register(agent_manager::actor(identity.clone()))?;
        }

        proxy.attach(identity.clone(), transport.clone(), serializer.clone())?;

        let dispatcher = Dispatcher::new(
            identity.clone(),
            Arc::new(registry),
            transport,
            serializer.clone(),
            &config.dispatcher,
        )?;

        tracing::info!(
            "Agent {} ready: actors={:?} pooled={}",
            identity,
            dispatcher.registry().prefixes(),
            dispatcher.is_pooled()
        );

        Ok(Self {
            identity,
            tags: config.agent.tags.clone(),
            dispatcher: Arc::new(dispatcher),
            proxy,
            serializer,
            security,
            sweep_interval: config.mapper.sweep_interval,
            sweeper: None,
            admission: Arc::new(Semaphore::new(config.dispatcher.admission_limit())),
            cancel: CancellationToken::new(),
            stats: RwLock::new(AgentStats::default()),
        })
    }

    pub fn identity(&self) -> &AgentId {
        &self.identity
    }

    /// Handle for outbound traffic through the mapper.
    pub fn proxy(&self) -> MapperProxy {
        self.proxy.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Announce services to the mapper and start expiring pending requests.
    pub async fn start(&mut self) -> Result<()> {
        self.proxy
            .register(self.dispatcher.registry().services(), self.tags.clone())
            .await?;

        if self.sweeper.is_none() {
            let mut sweeper = PendingSweeper::new(self.proxy.clone(), self.sweep_interval);
            let handle = sweeper.start();
            self.sweeper = Some((sweeper, handle));
        }
        self.stats.write().await.started_at = Some(Utc::now());
        Ok(())
    }

    /// Consume deliveries until cancelled or the queue closes.
    pub async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<Delivery>) -> Result<()> {
        let mut in_flight = JoinSet::new();
        tracing::info!("Agent {} consuming", self.identity);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Agent {} shutting down", self.identity);
                    break;
                }
                delivery = inbound.recv() => {
                    let Some(delivery) = delivery else {
                        tracing::info!("Inbound queue for {} closed", self.identity);
                        break;
                    };
                    self.handle_delivery(delivery, &mut in_flight).await;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Dispatch task failed: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Dispatch task failed: {}", e);
            }
        }

        if let Some((mut sweeper, handle)) = self.sweeper.take() {
            sweeper.stop();
            if let Err(e) = handle.await {
                tracing::warn!("Pending sweeper ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn stats(&self) -> AgentStats {
        self.stats.read().await.clone()
    }

    pub async fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats().await
    }

    pub async fn proxy_stats(&self) -> ProxyStats {
        self.proxy.stats().await
    }

    async fn handle_delivery(&self, delivery: Delivery, in_flight: &mut JoinSet<()>) {
        self.stats.write().await.received += 1;

        let packet = match self.serializer.load(&delivery.body) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.write().await.undecodable += 1;
                tracing::warn!(
                    "Dropping undecodable delivery ({} bytes): {}",
                    delivery.body.len(),
                    e
                );
                return;
            }
        };

        if !security::authorize(self.security.as_ref(), &packet) {
            self.stats.write().await.denied += 1;
            tracing::warn!(
                target: "audit",
                kind = packet.kind(),
                token = %packet.token(),
                from = %packet.sender(),
                "Denied {} from {}",
                packet.kind(),
                packet.sender()
            );
            return;
        }

        match packet {
            Packet::Result(result) => {
                self.stats.write().await.results += 1;
                self.proxy.handle_result(result).await;
            }
            deliverable => {
                if self.dispatcher.is_pooled() {
                    // Wait for a slot (backpressure when the pool is saturated)
                    let permit = tokio::select! {
                        _ = self.cancel.cancelled() => {
                            tracing::warn!(
                                "Dropping {} token={}: agent shutting down",
                                deliverable.kind(),
                                deliverable.token()
                            );
                            return;
                        }
                        permit = self.admission.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(e) => {
                                tracing::error!("Dispatch admission closed: {}", e);
                                return;
                            }
                        },
                    };
                    self.stats.write().await.dispatched += 1;
                    let dispatcher = self.dispatcher.clone();
                    in_flight.spawn(async move {
                        dispatcher.dispatch(deliverable).await;
                        drop(permit);
                    });
                } else {
                    self.stats.write().await.dispatched += 1;
                    self.dispatcher.dispatch(deliverable).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::Actor;
    use crate::broker::{Destination, InMemoryBroker};
    use crate::packets::{OperationResult, Push, Request, ResultPacket};
    use crate::security::{AllowAll, MockSecurityProvider};
    use crate::serializer::JsonSerializer;
    use crate::types::Token;
    use serde_json::{json, Value};

    fn config(identity: &str, single_threaded: bool) -> Config {
        let mut config = Config::default();
        config.agent.identity = identity.to_string();
        config.agent.tags = vec!["web".into()];
        config.dispatcher.single_threaded = single_threaded;
        config.dispatcher.threadpool_size = 4;
        config
    }

    async fn send(broker: &InMemoryBroker, queue: &str, packet: &Packet) {
        let body = JsonSerializer.dump(packet).unwrap();
        broker
            .publish(&Destination::direct(queue), body, false)
            .await
            .unwrap();
    }

    fn request(type_: &str, token: &str, reply_to: &str) -> Packet {
        Packet::Request(Request {
            type_: type_.into(),
            payload: json!("hi"),
            from: AgentId::must("caller"),
            token: Token::must(token),
            reply_to: AgentId::must(reply_to),
            persistent: false,
            target: None,
            tags: vec![],
        })
    }

    #[tokio::test]
    async fn test_agent_manager_registered_by_default() {
        let agent = Agent::new(
            &config("rs-1", true),
            ActorRegistry::new(),
            Arc::new(InMemoryBroker::new()),
            Arc::new(AllowAll),
        )
        .unwrap();

        assert_eq!(
            agent.dispatcher().registry().services(),
            vec!["/agent_manager".to_string()]
        );
        assert!(agent.proxy().is_attached());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config("rs-1", true);
        bad.agent.identity.clear();
        let result = Agent::new(
            &bad,
            ActorRegistry::new(),
            Arc::new(InMemoryBroker::new()),
            Arc::new(AllowAll),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_announces_services_and_tags() {
        let broker = InMemoryBroker::new();
        let mut registrations = broker.subscribe("registration", "mapper").await;
        let mut registry = ActorRegistry::new();
        registry.register(Actor::new("echo").expose("index", Ok)).unwrap();

        let mut agent = Agent::new(
            &config("rs-1", true),
            registry,
            Arc::new(broker.clone()),
            Arc::new(AllowAll),
        )
        .unwrap();
        agent.start().await.unwrap();

        match JsonSerializer.load(&registrations.recv().await.unwrap().body).unwrap() {
            Packet::Register(register) => {
                assert_eq!(register.from, AgentId::must("rs-1"));
                assert_eq!(register.services, vec!["/agent_manager", "/echo"]);
                assert_eq!(register.tags, vec!["web"]);
            }
            other => panic!("expected register, got {:?}", other),
        }
        agent.shutdown();
    }

    #[tokio::test]
    async fn test_run_dispatches_and_routes_results() {
        let broker = InMemoryBroker::new();
        let inbound = broker.declare_queue("rs-1").await.unwrap();
        let mut replies = broker.declare_queue("caller").await.unwrap();
        let mut outbound = broker.subscribe("request", "mapper").await;

        let mut registry = ActorRegistry::new();
        registry.register(Actor::new("echo").expose("index", Ok)).unwrap();
        let mut agent = Agent::new(
            &config("rs-1", false),
            registry,
            Arc::new(broker.clone()),
            Arc::new(AllowAll),
        )
        .unwrap();
        let proxy = agent.proxy();
        let cancel = agent.cancellation_token();
        let runner = tokio::spawn(async move {
            agent.run(inbound).await.unwrap();
            agent
        });

        // Inbound request is answered on the caller's queue
        send(&broker, "rs-1", &request("/echo", "t1", "caller")).await;
        let reply = JsonSerializer.load(&replies.recv().await.unwrap().body).unwrap();
        let Packet::Result(reply) = reply else {
            panic!("expected result");
        };
        assert_eq!(reply.token, Token::must("t1"));
        assert_eq!(reply.results, OperationResult::success(json!("hi")));

        // Outbound request is completed by a Result arriving on our queue
        let (tx, rx) = tokio::sync::oneshot::channel();
        let token = proxy
            .request("/booter/get", Value::Null, Default::default(), move |outcome| {
                let _ = tx.send(outcome);
            })
            .await
            .unwrap();
        assert!(outbound.recv().await.is_some());
        let result = Packet::Result(ResultPacket::new(
            token,
            AgentId::must("rs-1"),
            OperationResult::success(json!(7)),
            AgentId::must("mapper"),
        ));
        send(&broker, "rs-1", &result).await;
        let completed = rx.await.unwrap().unwrap();
        assert_eq!(completed.results, OperationResult::success(json!(7)));

        cancel.cancel();
        let agent = runner.await.unwrap();
        let stats = agent.stats().await;
        assert_eq!(stats.received, 2);
        assert_eq!(stats.results, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[tokio::test]
    async fn test_denied_packets_are_not_dispatched() {
        let broker = InMemoryBroker::new();
        let inbound = broker.declare_queue("rs-1").await.unwrap();
        let mut replies = broker.declare_queue("caller").await.unwrap();

        let mut security = MockSecurityProvider::new();
        security.expect_authorize_request().returning(|packet| {
            !matches!(packet, Packet::Request(r) if r.type_.starts_with("/forbidden"))
        });

        let mut registry = ActorRegistry::new();
        registry
            .register(Actor::new("forbidden").expose("index", |_| panic!("must not run")))
            .unwrap();
        registry.register(Actor::new("echo").expose("index", Ok)).unwrap();

        let mut agent = Agent::new(
            &config("rs-1", true),
            registry,
            Arc::new(broker.clone()),
            Arc::new(security),
        )
        .unwrap();

        send(&broker, "rs-1", &request("/forbidden", "t1", "caller")).await;
        send(&broker, "rs-1", &request("/echo", "t2", "caller")).await;
        broker.delete_queue("rs-1").await;
        agent.run(inbound).await.unwrap();

        let reply = JsonSerializer.load(&replies.recv().await.unwrap().body).unwrap();
        assert_eq!(reply.token(), &Token::must("t2"));
        assert!(replies.try_recv().is_err());

        let stats = agent.stats().await;
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[tokio::test]
    async fn test_undecodable_delivery_is_dropped() {
        let broker = InMemoryBroker::new();
        let inbound = broker.declare_queue("rs-1").await.unwrap();
        let mut agent = Agent::new(
            &config("rs-1", true),
            ActorRegistry::new(),
            Arc::new(broker.clone()),
            Arc::new(AllowAll),
        )
        .unwrap();

        broker
            .publish(&Destination::direct("rs-1"), b"not a packet".to_vec(), false)
            .await
            .unwrap();
        let push = Packet::Push(Push {
            type_: "/agent_manager/ping".into(),
            payload: Value::Null,
            from: AgentId::must("caller"),
            token: Token::new(),
            persistent: false,
            target: None,
            tags: vec![],
        });
        send(&broker, "rs-1", &push).await;
        broker.delete_queue("rs-1").await;
        agent.run(inbound).await.unwrap();

        let stats = agent.stats().await;
        assert_eq!(stats.received, 2);
        assert_eq!(stats.undecodable, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_stops_reading_inbound() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let broker = InMemoryBroker::new();
        let inbound = broker.declare_queue("rs-1").await.unwrap();
        let _replies = broker.declare_queue("caller").await.unwrap();
        let mut outbound = broker.subscribe("request", "mapper").await;

        let started = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));
        let (s, r) = (started.clone(), release.clone());
        let mut registry = ActorRegistry::new();
        registry
            .register(Actor::new("hold").expose("index", move |p| {
                s.fetch_add(1, Ordering::SeqCst);
                while !r.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(p)
            }))
            .unwrap();

        let mut config = config("rs-1", false);
        config.dispatcher.threadpool_size = 2;
        config.dispatcher.job_queue_capacity = 1;
        let mut agent = Agent::new(&config, registry, Arc::new(broker.clone()), Arc::new(AllowAll))
            .unwrap();
        let proxy = agent.proxy();
        let cancel = agent.cancellation_token();
        let runner = tokio::spawn(async move {
            agent.run(inbound).await.unwrap();
            agent
        });

        let token = proxy
            .request("/booter/get", Value::Null, Default::default(), |_| {})
            .await
            .unwrap();
        assert!(outbound.recv().await.is_some());

        // Two running, one queued, one waiting for a slot
        for i in 0..4 {
            send(&broker, "rs-1", &request("/hold", &format!("h{}", i), "caller")).await;
        }
        let result = Packet::Result(ResultPacket::new(
            token.clone(),
            AgentId::must("rs-1"),
            OperationResult::success(json!(7)),
            AgentId::must("mapper"),
        ));
        send(&broker, "rs-1", &result).await;

        while started.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(proxy.is_pending(&token).await);

        release.store(true, Ordering::SeqCst);
        while proxy.is_pending(&token).await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        let agent = runner.await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 4);
        let stats = agent.stats().await;
        assert_eq!(stats.dispatched, 4);
        assert_eq!(stats.results, 1);
    }
}
