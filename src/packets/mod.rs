//! Packet model - the envelopes exchanged over the bus.
//!
//! Every packet carries identity (`from`), correlation (`token`) and
//! durability (`persistent`). Requests, Pushes and the mapper-bound
//! side-channel packets also carry a slash-delimited routing key (`type`)
//! that decomposes into an actor prefix and an operation name.

mod result;

pub use result::OperationResult;

use crate::types::{AgentId, Token};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation invoked when a routing key names only the actor prefix.
pub const DEFAULT_METHOD: &str = "index";

/// Routing key of [`TagQuery`] packets.
pub const TAG_QUERY_TYPE: &str = "/mapper/query_tags";
/// Routing key of [`TagUpdate`] packets.
pub const TAG_UPDATE_TYPE: &str = "/mapper/update_tags";
/// Routing key of [`Register`] packets.
pub const REGISTER_TYPE: &str = "/mapper/register";

/// Split a routing key into `(prefix, method)`.
///
/// One leading `/` is stripped; the first segment is the prefix and the
/// second the method. A missing or empty method yields [`DEFAULT_METHOD`].
/// Segments past the second are ignored.
///
/// ```
/// use rightagent_core::packets::split_type;
///
/// assert_eq!(split_type("/booter/get_repositories"), ("booter", "get_repositories"));
/// assert_eq!(split_type("/echo"), ("echo", "index"));
/// ```
pub fn split_type(type_: &str) -> (&str, &str) {
    let trimmed = type_.strip_prefix('/').unwrap_or(type_);
    let mut segments = trimmed.split('/');
    let prefix = segments.next().unwrap_or("");
    let method = match segments.next() {
        Some(m) if !m.is_empty() => m,
        _ => DEFAULT_METHOD,
    };
    (prefix, method)
}

/// Request expecting a correlated [`ResultPacket`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub payload: Value,
    pub from: AgentId,
    pub token: Token,
    /// Queue that receives the Result.
    pub reply_to: AgentId,
    #[serde(default)]
    pub persistent: bool,
    /// Specific agent this request is aimed at, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AgentId>,
    /// Tag filter the mapper uses to pick a target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Fire-and-forget message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub payload: Value,
    pub from: AgentId,
    pub token: Token,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Terminal reply correlated to a [`Request`] or [`TagQuery`] by token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPacket {
    pub token: Token,
    pub to: AgentId,
    pub results: OperationResult,
    pub from: AgentId,
    #[serde(default)]
    pub persistent: bool,
}

impl ResultPacket {
    pub fn new(token: Token, to: AgentId, results: OperationResult, from: AgentId) -> Self {
        Self {
            token,
            to,
            results,
            from,
            persistent: false,
        }
    }
}

/// Tag-based discovery query; answered with a Result listing matching agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagQuery {
    pub from: AgentId,
    pub token: Token,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub persistent: bool,
}

/// Tag set change announced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub from: AgentId,
    pub token: Token,
    #[serde(default)]
    pub new_tags: Vec<String>,
    #[serde(default)]
    pub obsolete_tags: Vec<String>,
    #[serde(default)]
    pub persistent: bool,
}

/// Service announcement published once an agent is ready to take requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub from: AgentId,
    pub token: Token,
    /// Routes served by the agent, e.g. `/agent_manager`.
    pub services: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub persistent: bool,
}

/// Any envelope that travels on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "packet", rename_all = "snake_case")]
pub enum Packet {
    Request(Request),
    Push(Push),
    Result(ResultPacket),
    TagQuery(TagQuery),
    TagUpdate(TagUpdate),
    Register(Register),
}

impl Packet {
    /// Short packet kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Request(_) => "request",
            Packet::Push(_) => "push",
            Packet::Result(_) => "result",
            Packet::TagQuery(_) => "tag_query",
            Packet::TagUpdate(_) => "tag_update",
            Packet::Register(_) => "register",
        }
    }

    /// Routing key used by the dispatcher. Results are never routed.
    pub fn type_key(&self) -> Option<&str> {
        match self {
            Packet::Request(r) => Some(&r.type_),
            Packet::Push(p) => Some(&p.type_),
            Packet::TagQuery(_) => Some(TAG_QUERY_TYPE),
            Packet::TagUpdate(_) => Some(TAG_UPDATE_TYPE),
            Packet::Register(_) => Some(REGISTER_TYPE),
            Packet::Result(_) => None,
        }
    }

    pub fn token(&self) -> &Token {
        match self {
            Packet::Request(r) => &r.token,
            Packet::Push(p) => &p.token,
            Packet::Result(r) => &r.token,
            Packet::TagQuery(q) => &q.token,
            Packet::TagUpdate(u) => &u.token,
            Packet::Register(r) => &r.token,
        }
    }

    pub fn sender(&self) -> &AgentId {
        match self {
            Packet::Request(r) => &r.from,
            Packet::Push(p) => &p.from,
            Packet::Result(r) => &r.from,
            Packet::TagQuery(q) => &q.from,
            Packet::TagUpdate(u) => &u.from,
            Packet::Register(r) => &r.from,
        }
    }

    pub fn persistent(&self) -> bool {
        match self {
            Packet::Request(r) => r.persistent,
            Packet::Push(p) => p.persistent,
            Packet::Result(r) => r.persistent,
            Packet::TagQuery(q) => q.persistent,
            Packet::TagUpdate(u) => u.persistent,
            Packet::Register(r) => r.persistent,
        }
    }

    /// Payload handed to the operation. Side-channel packets expose their
    /// fields as a JSON object.
    pub fn payload(&self) -> Value {
        match self {
            Packet::Request(r) => r.payload.clone(),
            Packet::Push(p) => p.payload.clone(),
            Packet::TagQuery(q) => serde_json::json!({
                "tags": q.tags,
                "agent_ids": q.agent_ids,
            }),
            Packet::TagUpdate(u) => serde_json::json!({
                "new_tags": u.new_tags,
                "obsolete_tags": u.obsolete_tags,
            }),
            Packet::Register(r) => serde_json::json!({
                "services": r.services,
                "tags": r.tags,
            }),
            Packet::Result(_) => Value::Null,
        }
    }

    /// Destination of the correlated Result, for packets that expect one.
    pub fn reply_to(&self) -> Option<&AgentId> {
        match self {
            Packet::Request(r) => Some(&r.reply_to),
            Packet::TagQuery(q) => Some(&q.from),
            _ => None,
        }
    }

    /// Whether dispatching this packet produces a Result.
    pub fn expects_reply(&self) -> bool {
        self.reply_to().is_some()
    }
}
