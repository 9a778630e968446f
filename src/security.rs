//! Authorization hooks applied to inbound packets.
//!
//! The agent runtime consults the provider before anything reaches the
//! dispatcher. Denied packets are dropped with an `audit` log entry.

use crate::packets::{Packet, Register};
use std::fmt::Debug;

/// Pluggable authorization for registrations and inbound requests.
#[cfg_attr(test, mockall::automock)]
pub trait SecurityProvider: Send + Sync + Debug {
    /// Whether a service announcement may be accepted.
    fn authorize_registration(&self, registration: &Register) -> bool;

    /// Whether an inbound request, push or tag packet may be dispatched.
    fn authorize_request(&self, request: &Packet) -> bool;
}

/// Default provider: every packet is authorized.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl SecurityProvider for AllowAll {
    fn authorize_registration(&self, _registration: &Register) -> bool {
        true
    }

    fn authorize_request(&self, _request: &Packet) -> bool {
        true
    }
}

/// Check a packet against the provider, routing registrations to
/// `authorize_registration`. Results are always accepted.
pub fn authorize(provider: &dyn SecurityProvider, packet: &Packet) -> bool {
    match packet {
        Packet::Register(registration) => provider.authorize_registration(registration),
        Packet::Result(_) => true,
        other => provider.authorize_request(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{OperationResult, Push, ResultPacket};
    use crate::types::{AgentId, Token};
    use serde_json::Value;

    fn push() -> Packet {
        Packet::Push(Push {
            type_: "/x".into(),
            payload: Value::Null,
            from: AgentId::must("a"),
            token: Token::must("t"),
            persistent: false,
            target: None,
            tags: vec![],
        })
    }

    #[test]
    fn test_allow_all() {
        assert!(authorize(&AllowAll, &push()));
        let registration = Packet::Register(Register {
            from: AgentId::must("a"),
            token: Token::must("t"),
            services: vec!["/x".into()],
            tags: vec![],
            persistent: false,
        });
        assert!(authorize(&AllowAll, &registration));
    }

    #[test]
    fn test_registration_uses_registration_hook() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_authorize_registration().times(1).return_const(false);
        provider.expect_authorize_request().never();

        let registration = Packet::Register(Register {
            from: AgentId::must("a"),
            token: Token::must("t"),
            services: vec![],
            tags: vec![],
            persistent: false,
        });
        assert!(!authorize(&provider, &registration));
    }

    #[test]
    fn test_results_bypass_provider() {
        let mut provider = MockSecurityProvider::new();
        provider.expect_authorize_request().never();
        provider.expect_authorize_registration().never();

        let result = Packet::Result(ResultPacket::new(
            Token::must("t"),
            AgentId::must("me"),
            OperationResult::success(Value::Null),
            AgentId::must("other"),
        ));
        assert!(authorize(&provider, &result));
    }
}
