//! Actor registry - routing prefix to actor.
//!
//! Populated at startup, then shared read-only behind an `Arc` by the
//! dispatcher. Duplicate prefixes are rejected so configuration mistakes
//! surface before the agent starts taking requests.

use super::{Actor, Operation};
use crate::packets::split_type;
use crate::types::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix → actor map.
#[derive(Debug, Default)]
pub struct ActorRegistry {
    actors: HashMap<String, Arc<Actor>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self {
            actors: HashMap::new(),
        }
    }

    /// Bind the actor's prefix. Fails if the prefix is empty, contains `/`,
    /// or is already bound.
    pub fn register(&mut self, actor: Actor) -> Result<()> {
        let prefix = actor.prefix().to_string();
        if prefix.is_empty() {
            return Err(Error::validation("Actor prefix cannot be empty"));
        }
        if prefix.contains('/') {
            return Err(Error::validation(format!(
                "Actor prefix cannot contain '/': {}",
                prefix
            )));
        }
        if self.actors.contains_key(&prefix) {
            return Err(Error::validation(format!(
                "Actor already registered for prefix: {}",
                prefix
            )));
        }

        tracing::debug!(
            "Registered actor prefix={} methods={:?}",
            prefix,
            actor.methods()
        );
        self.actors.insert(prefix, Arc::new(actor));
        Ok(())
    }

    /// Look up the actor bound to `prefix`.
    pub fn actor_for(&self, prefix: &str) -> Result<Arc<Actor>> {
        self.actors
            .get(prefix)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("No actor registered for prefix: {}", prefix)))
    }

    /// Resolve a routing key to its actor and operation.
    pub fn resolve(&self, type_: &str) -> Result<(Arc<Actor>, Operation)> {
        let (prefix, method) = split_type(type_);
        let actor = self.actor_for(prefix)?;
        let operation = actor.operation(method).cloned().ok_or_else(|| {
            Error::not_found(format!(
                "Actor {} has no operation: {}",
                prefix, method
            ))
        })?;
        Ok((actor, operation))
    }

    /// Registered prefixes, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self.actors.keys().cloned().collect();
        prefixes.sort();
        prefixes
    }

    /// Routes announced in the registration packet (`/prefix`).
    pub fn services(&self) -> Vec<String> {
        self.prefixes()
            .into_iter()
            .map(|p| format!("/{}", p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Actor {
        Actor::new("echo").expose("index", Ok)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActorRegistry::new();
        registry.register(echo()).unwrap();

        let actor = registry.actor_for("echo").unwrap();
        assert_eq!(actor.prefix(), "echo");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_duplicate_prefix() {
        let mut registry = ActorRegistry::new();
        registry.register(echo()).unwrap();

        let result = registry.register(echo());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already registered"));
    }

    #[test]
    fn test_register_invalid_prefix() {
        let mut registry = ActorRegistry::new();
        assert!(registry.register(Actor::new("")).is_err());
        assert!(registry.register(Actor::new("a/b")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_actor_for_unknown_is_not_found() {
        let registry = ActorRegistry::new();
        let err = registry.actor_for("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_resolve_defaults_to_index() {
        let mut registry = ActorRegistry::new();
        registry.register(echo()).unwrap();

        let (actor, op) = registry.resolve("/echo").unwrap();
        assert_eq!(actor.prefix(), "echo");
        let deliverable = crate::packets::Packet::Push(crate::packets::Push {
            type_: "/echo".into(),
            payload: json!("hi"),
            from: crate::types::AgentId::must("a"),
            token: crate::types::Token::must("t"),
            persistent: false,
            target: None,
            tags: vec![],
        });
        assert_eq!(op.invoke(json!("hi"), &deliverable).unwrap(), json!("hi"));

        let err = registry.resolve("/echo/missing").unwrap_err();
        assert!(err.to_string().contains("no operation: missing"));
    }

    #[test]
    fn test_services_are_sorted_routes() {
        let mut registry = ActorRegistry::new();
        registry.register(Actor::new("zeta")).unwrap();
        registry.register(Actor::new("alpha")).unwrap();
        assert_eq!(registry.services(), vec!["/alpha", "/zeta"]);
    }
}
