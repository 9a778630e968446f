//! Actors - handler objects reachable by routing prefix.
//!
//! An [`Actor`] exposes named operations. Each operation is registered with
//! an explicit call shape:
//! - **payload-only**: `Fn(Value) -> HandlerResult`
//! - **payload + envelope**: `Fn(Value, &Packet) -> HandlerResult`, for
//!   operations that inspect the sender, token or tags.
//!
//! An actor may also carry a [`FailureObserver`] that hears about every
//! failed operation.

pub mod agent_manager;
mod registry;

pub use registry::ActorRegistry;

use crate::packets::Packet;
use crate::recovery::extract_panic_message;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Value produced by an operation.
pub type HandlerResult<T = Value> = std::result::Result<T, HandlerError>;

// =============================================================================
// HandlerError
// =============================================================================

/// Failure raised by an operation body.
///
/// Any `std::error::Error` converts into a `HandlerError` via `?`, taking
/// the error's type name as its class.
#[derive(Debug, Clone)]
pub struct HandlerError {
    class: String,
    message: String,
    backtrace: String,
}

impl HandlerError {
    /// Failure of the given class, capturing the current backtrace.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Failure built from a recovered panic payload.
    ///
    /// The stack has already unwound by the time the payload is recovered, so
    /// the backtrace shows the recovery guard rather than the panic site.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self::new("Panic", extract_panic_message(payload))
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `"<Class>: <message>\n<backtrace>"`, the text carried by error results.
    pub fn formatted(&self) -> String {
        format!("{}: {}\n{}", self.class, self.message, self.backtrace)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }
}

/// Last path segment of a type name, keeping the module for bare `Error`s
/// (`io::Error`, `serde_json::Error`).
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let mut segments = base.rsplit("::");
    let last = segments.next().unwrap_or(base);
    if last == "Error" {
        if let Some(module) = segments.find(|s| *s != "error") {
            return format!("{}::{}", module, last);
        }
    }
    last.to_string()
}

// =============================================================================
// Operations
// =============================================================================

type PayloadFn = dyn Fn(Value) -> HandlerResult + Send + Sync;
type EnvelopeFn = dyn Fn(Value, &Packet) -> HandlerResult + Send + Sync;

/// A callable operation with its registered call shape.
#[derive(Clone)]
pub enum Operation {
    /// Receives only the payload.
    Payload(Arc<PayloadFn>),
    /// Receives the payload and the deliverable it arrived in.
    WithEnvelope(Arc<EnvelopeFn>),
}

impl Operation {
    /// Call the operation with the shape it was registered with.
    pub fn invoke(&self, payload: Value, deliverable: &Packet) -> HandlerResult {
        match self {
            Operation::Payload(f) => f(payload),
            Operation::WithEnvelope(f) => f(payload, deliverable),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Payload(_) => f.write_str("Operation::Payload"),
            Operation::WithEnvelope(_) => f.write_str("Operation::WithEnvelope"),
        }
    }
}

// =============================================================================
// Failure observer
// =============================================================================

/// Hook invoked with `(method, deliverable, error)` whenever one of the
/// actor's operations fails. Its own failures are logged and dropped.
pub trait FailureObserver: Send + Sync {
    fn on_failure(
        &self,
        method: &str,
        deliverable: &Packet,
        error: &HandlerError,
    ) -> HandlerResult<()>;
}

impl<F> FailureObserver for F
where
    F: Fn(&str, &Packet, &HandlerError) -> HandlerResult<()> + Send + Sync,
{
    fn on_failure(
        &self,
        method: &str,
        deliverable: &Packet,
        error: &HandlerError,
    ) -> HandlerResult<()> {
        self(method, deliverable, error)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Handler object bound to a routing prefix.
///
/// ```
/// use rightagent_core::actors::Actor;
///
/// let echo = Actor::new("echo")
///     .expose("index", |payload| Ok(payload))
///     .expose_with_envelope("whoami", |_payload, deliverable| {
///         Ok(deliverable.sender().to_string().into())
///     });
/// assert_eq!(echo.methods(), vec!["index", "whoami"]);
/// ```
pub struct Actor {
    prefix: String,
    operations: HashMap<String, Operation>,
    failure_observer: Option<Arc<dyn FailureObserver>>,
}

impl Actor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            operations: HashMap::new(),
            failure_observer: None,
        }
    }

    /// Expose a payload-only operation. Re-exposing a name replaces it.
    pub fn expose<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.operations
            .insert(method.into(), Operation::Payload(Arc::new(f)));
        self
    }

    /// Expose an operation that also receives the deliverable.
    pub fn expose_with_envelope<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &Packet) -> HandlerResult + Send + Sync + 'static,
    {
        self.operations
            .insert(method.into(), Operation::WithEnvelope(Arc::new(f)));
        self
    }

    /// Attach the failure observer.
    pub fn on_failure<O>(mut self, observer: O) -> Self
    where
        O: FailureObserver + 'static,
    {
        self.failure_observer = Some(Arc::new(observer));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn operation(&self, method: &str) -> Option<&Operation> {
        self.operations.get(method)
    }

    /// Exposed operation names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn failure_observer(&self) -> Option<&Arc<dyn FailureObserver>> {
        self.failure_observer.as_ref()
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("prefix", &self.prefix)
            .field("methods", &self.methods())
            .field("failure_observer", &self.failure_observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Push;
    use crate::types::{AgentId, Token};
    use serde_json::json;

    fn push(payload: Value) -> Packet {
        Packet::Push(Push {
            type_: "/t/m".into(),
            payload,
            from: AgentId::must("sender-7"),
            token: Token::must("tok"),
            persistent: false,
            target: None,
            tags: vec![],
        })
    }

    #[test]
    fn test_operation_shapes() {
        let actor = Actor::new("t")
            .expose("one", |p| Ok(json!({ "got": p })))
            .expose_with_envelope("two", |p, d| {
                Ok(json!({ "got": p, "from": d.sender().as_str() }))
            });

        let deliverable = push(json!(5));
        let one = actor.operation("one").unwrap();
        let two = actor.operation("two").unwrap();
        assert!(matches!(one, Operation::Payload(_)));
        assert!(matches!(two, Operation::WithEnvelope(_)));
        assert_eq!(one.invoke(json!(5), &deliverable).unwrap(), json!({"got": 5}));
        assert_eq!(
            two.invoke(json!(5), &deliverable).unwrap(),
            json!({"got": 5, "from": "sender-7"})
        );
        assert!(actor.operation("three").is_none());
    }

    #[test]
    fn test_std_errors_convert_with_class_name() {
        fn parse(p: Value) -> HandlerResult {
            let n: u32 = p.as_str().unwrap_or("").parse()?;
            Ok(json!(n))
        }
        let err = parse(json!("nope")).unwrap_err();
        assert_eq!(err.class(), "ParseIntError");
        assert!(err.formatted().starts_with("ParseIntError: invalid digit"));

        let io: HandlerError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(io.class(), "io::Error");
    }

    #[test]
    fn test_formatted_includes_backtrace_line() {
        let err = HandlerError::new("RuntimeError", "fail");
        let text = err.formatted();
        assert!(text.starts_with("RuntimeError: fail\n"));
        assert_eq!(err.to_string(), "RuntimeError: fail");
    }

    #[test]
    fn test_closure_failure_observer() {
        let observer = |method: &str, _d: &Packet, e: &HandlerError| -> HandlerResult<()> {
            assert_eq!(method, "m");
            assert_eq!(e.class(), "Boom");
            Ok(())
        };
        let actor = Actor::new("t").on_failure(observer);
        let err = HandlerError::new("Boom", "x");
        actor
            .failure_observer()
            .unwrap()
            .on_failure("m", &push(Value::Null), &err)
            .unwrap();
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload = std::panic::catch_unwind(|| panic!("went wrong")).unwrap_err();
        let err = HandlerError::from_panic(payload.as_ref());
        assert_eq!(err.class(), "Panic");
        assert_eq!(err.message(), "went wrong");
    }
}
