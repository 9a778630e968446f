//! Built-in `agent_manager` actor registered by every agent.

use super::Actor;
use crate::types::AgentId;
use serde_json::json;

/// Routing prefix of the built-in actor.
pub const PREFIX: &str = "agent_manager";

/// Liveness actor: `/agent_manager/ping` answers with the agent identity and
/// the requester it saw.
pub fn actor(identity: AgentId) -> Actor {
    let ping_identity = identity.clone();
    Actor::new(PREFIX)
        .expose_with_envelope("ping", move |_payload, deliverable| {
            Ok(json!({
                "identity": ping_identity.as_str(),
                "requester": deliverable.sender().as_str(),
            }))
        })
        .expose("index", move |_payload| {
            Ok(json!({ "identity": identity.as_str() }))
        })
}
