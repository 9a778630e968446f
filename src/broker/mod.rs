//! Transport boundary to the message bus.
//!
//! The agent only ever publishes to three kinds of destination:
//!   - the `request` fanout (Requests, Pushes, TagQueries)
//!   - the `registration` fanout (TagUpdates, Registers)
//!   - a direct queue named after an agent identity (Results)
//!
//! Consumption happens on the agent's own direct queue, handed to the
//! runtime as a stream of [`Delivery`] values.

mod memory;

pub use memory::{BrokerStats, InMemoryBroker};

use crate::types::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Fanout exchange for Requests, Pushes and TagQueries.
pub const REQUEST_EXCHANGE: &str = "request";
/// Fanout exchange for TagUpdates and Registers.
pub const REGISTRATION_EXCHANGE: &str = "registration";

/// Publish target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Delivered to every current subscriber of the exchange.
    Fanout(String),
    /// Delivered to the single consumer of the named queue.
    Direct(String),
}

impl Destination {
    pub fn request() -> Self {
        Destination::Fanout(REQUEST_EXCHANGE.to_string())
    }

    pub fn registration() -> Self {
        Destination::Fanout(REGISTRATION_EXCHANGE.to_string())
    }

    pub fn direct(queue: impl Into<String>) -> Self {
        Destination::Direct(queue.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Fanout(name) => write!(f, "fanout:{}", name),
            Destination::Direct(name) => write!(f, "direct:{}", name),
        }
    }
}

/// Message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Bytes,
    pub persistent: bool,
}

/// Publish side of the bus.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Publish an encoded packet. Returns the number of consumers it reached.
    async fn publish(&self, destination: &Destination, body: Vec<u8>, persistent: bool)
        -> Result<usize>;
}
