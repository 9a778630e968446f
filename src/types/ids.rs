//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `must()`, `as_str()`, Display,
/// Serialize, Deserialize. Optionally generates `new()` (UUID v4) and
/// `Default` if the `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        define_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().simple().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            /// Construct from a literal known to be non-empty.
            ///
            /// Empty input is kept as-is; use `from_string` for untrusted data.
            pub fn must(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Correlation id binding a Request to its eventual Result.
define_id!(Token, uuid);
// Identity of an agent, also the name of its direct reply queue.
define_id!(AgentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = Token::new();
        let b = Token::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(AgentId::from_string(String::new()).is_err());
        assert!(Token::from_string(String::new()).is_err());
        let id = AgentId::from_string("rs-instance-1".to_string()).unwrap();
        assert_eq!(id.to_string(), "rs-instance-1");
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let token = Token::must("t1");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"t1\"");
        let back: Token = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, token);
    }
}
