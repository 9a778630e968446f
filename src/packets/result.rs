//! Success/error union carried by Result packets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of dispatching a deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum OperationResult {
    /// Value returned by the operation.
    Success(Value),
    /// Formatted failure: `"<Class>: <message>\n<backtrace>"`.
    Error(String),
    /// The deliverable could not be routed to an operation.
    NonDelivery(String),
}

impl OperationResult {
    pub fn success(value: Value) -> Self {
        Self::Success(value)
    }

    pub fn error(formatted: impl Into<String>) -> Self {
        Self::Error(formatted.into())
    }

    pub fn non_delivery(reason: impl Into<String>) -> Self {
        Self::NonDelivery(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn as_success(&self) -> Option<&Value> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    /// Failure text for error and non-delivery outcomes.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Error(msg) | Self::NonDelivery(msg) => Some(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_representation() {
        let ok = OperationResult::success(json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "content": {"a": 1}})
        );

        let nd = OperationResult::non_delivery("no actor");
        assert_eq!(
            serde_json::to_value(&nd).unwrap(),
            json!({"status": "non_delivery", "content": "no actor"})
        );
    }

    #[test]
    fn test_accessors() {
        let err = OperationResult::error("RuntimeError: fail");
        assert!(!err.is_success());
        assert_eq!(err.failure(), Some("RuntimeError: fail"));
        assert_eq!(err.as_success(), None);
        assert_eq!(OperationResult::success(json!(2)).failure(), None);
    }
}
