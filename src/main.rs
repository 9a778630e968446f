//! RightAgent loopback runner - main entry point.
//!
//! Starts an agent on the in-memory broker with a loopback mapper that
//! routes every outbound request back to the agent itself, pings it once
//! through the mapper proxy, then serves until Ctrl-C.

use clap::Parser;
use rightagent_core::actors::ActorRegistry;
use rightagent_core::agent::Agent;
use rightagent_core::broker::{Destination, InMemoryBroker, Transport, REQUEST_EXCHANGE};
use rightagent_core::mapper_proxy::RequestOptions;
use rightagent_core::security::AllowAll;
use rightagent_core::Config;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rightagent", version, about = "Run a RightAgent on a loopback broker")]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, env = "RIGHTAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Agent identity (overrides the configuration file).
    #[arg(long, env = "RIGHTAGENT_IDENTITY")]
    identity: Option<String>,

    /// Worker threads for offloaded operations.
    #[arg(long)]
    threads: Option<usize>,

    /// Run every operation inline on the event loop.
    #[arg(long)]
    single_threaded: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(identity) = cli.identity {
        config.agent.identity = identity;
    }
    if let Some(threads) = cli.threads {
        config.dispatcher.threadpool_size = threads;
    }
    if cli.single_threaded {
        config.dispatcher.single_threaded = true;
    }
    config.validate()?;

    // Initialize observability
    rightagent_core::observability::init_tracing_with(&config.observability);

    let broker = InMemoryBroker::new();
    let identity = config.identity()?;
    let inbound = broker.declare_queue(identity.as_str()).await?;

    // Loopback mapper: every request comes straight back to this agent
    let mut requests = broker.subscribe(REQUEST_EXCHANGE, "loopback-mapper").await;
    let loopback = broker.clone();
    let own_queue = Destination::direct(identity.as_str());
    tokio::spawn(async move {
        while let Some(delivery) = requests.recv().await {
            if let Err(e) = loopback
                .publish(&own_queue, delivery.body.to_vec(), delivery.persistent)
                .await
            {
                tracing::warn!("Loopback forward failed: {}", e);
            }
        }
    });

    let mut agent = Agent::new(
        &config,
        ActorRegistry::new(),
        Arc::new(broker),
        Arc::new(AllowAll),
    )?;
    agent.start().await?;

    let proxy = agent.proxy();
    tokio::spawn(async move {
        match proxy
            .request_and_wait("/agent_manager/ping", Value::Null, RequestOptions::default())
            .await
        {
            Ok(result) => tracing::info!("Self-ping answered: {:?}", result.results),
            Err(e) => tracing::warn!("Self-ping failed: {}", e),
        }
    });

    let cancel = agent.cancellation_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
        cancel.cancel();
    });

    tracing::info!("RightAgent {} running; press Ctrl-C to stop", identity);
    agent.run(inbound).await?;

    Ok(())
}
