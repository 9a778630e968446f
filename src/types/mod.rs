//! Core types for the agent runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (Token, AgentId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the agent, dispatcher and proxy

mod config;
mod errors;
mod ids;

pub use config::{
    AgentConfig, Config, DispatcherConfig, MapperConfig, ObservabilityConfig, SerializerConfig,
    SerializerFormat,
};
pub use errors::{Error, Result};
pub use ids::{AgentId, Token};
