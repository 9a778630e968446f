//! # RightAgent Core - Agent-side dispatch and mapper messaging
//!
//! Rust implementation of the agent messaging core providing:
//! - Packet model (Request, Push, Result, TagQuery, TagUpdate, Register)
//! - Pluggable packet serializers (JSON, MessagePack)
//! - Actor registry with typed operations and failure observers
//! - Dispatcher with inline or worker-pool execution and duplicate suppression
//! - Mapper proxy with a deadline-tracked pending-request table
//! - Bounded LRU cache
//! - Security provider hook
//!
//! ## Architecture
//!
//! ```text
//!   agent queue ──► Agent runtime ──► SecurityProvider
//!                        │
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!       Dispatcher              MapperProxy
//!   (actors, worker pool)    (pending table, sweeper)
//!            │                       │
//!            └──── Transport ◄───────┘
//!         (reply queues)   (request / registration fanouts)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod actors;
pub mod agent;
pub mod broker;
pub mod cache;
pub mod dispatcher;
pub mod mapper_proxy;
pub mod packets;
pub mod security;
pub mod serializer;
pub mod types;

// Internal utilities
pub mod observability;
pub mod recovery;

pub use types::{Config, Error, Result};
