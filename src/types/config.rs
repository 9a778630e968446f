//! Configuration structures.
//!
//! Configuration is loaded from a JSON file and overridden by CLI flags or
//! environment variables in the binary.

use crate::types::{AgentId, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent identity and tags.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Dispatcher execution policy.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Mapper proxy behavior.
    #[serde(default)]
    pub mapper: MapperConfig,

    /// Packet encoding.
    #[serde(default)]
    pub serializer: SerializerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.agent.identity.is_empty() {
            return Err(Error::configuration("agent.identity cannot be empty"));
        }
        if self.dispatcher.threadpool_size == 0 {
            return Err(Error::configuration(
                "dispatcher.threadpool_size must be at least 1",
            ));
        }
        if self.dispatcher.job_queue_capacity == 0 {
            return Err(Error::configuration(
                "dispatcher.job_queue_capacity must be at least 1",
            ));
        }
        if self.dispatcher.duplicate_cache_capacity == 0 {
            return Err(Error::configuration(
                "dispatcher.duplicate_cache_capacity must be at least 1",
            ));
        }
        if self.mapper.sweep_interval.is_zero() {
            return Err(Error::configuration("mapper.sweep_interval cannot be zero"));
        }
        Ok(())
    }

    /// Typed identity of this agent.
    pub fn identity(&self) -> Result<AgentId> {
        AgentId::from_string(self.agent.identity.clone())
            .map_err(|e| Error::configuration(e.to_string()))
    }
}

/// Agent identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identity; also the name of the agent's direct reply queue.
    pub identity: String,

    /// Tags announced with the registration packet.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identity: "rs-agent-local".to_string(),
            tags: Vec::new(),
        }
    }
}

/// Dispatcher execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Run every operation inline on the runtime task.
    pub single_threaded: bool,

    /// Number of worker threads for offloaded operations. A size of 1 is
    /// treated as single-threaded.
    pub threadpool_size: usize,

    /// Bounded job queue capacity feeding the worker threads.
    pub job_queue_capacity: usize,

    /// Number of recently seen request tokens kept for duplicate suppression.
    pub duplicate_cache_capacity: usize,
}

impl DispatcherConfig {
    /// Whether operations are offloaded to the worker pool.
    pub fn uses_pool(&self) -> bool {
        !self.single_threaded && self.threadpool_size > 1
    }

    /// Most dispatches the agent admits at once: one per worker plus one per
    /// queued job.
    pub fn admission_limit(&self) -> usize {
        self.threadpool_size + self.job_queue_capacity
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            single_threaded: false,
            threadpool_size: 20,
            job_queue_capacity: 256,
            duplicate_cache_capacity: 100,
        }
    }
}

/// Mapper proxy behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Default `persistent` flag for outbound packets.
    pub persistent: bool,

    /// Deadline applied to pending requests that do not set their own.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How often the sweeper expires pending requests.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            request_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Packet encoding on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SerializerFormat {
    #[default]
    Json,
    Msgpack,
}

/// Serializer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SerializerConfig {
    #[serde(default)]
    pub format: SerializerFormat,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
