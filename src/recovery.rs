//! Panic recovery for operation bodies and caller-supplied callbacks.
//!
//! Nothing an actor or a completion does may take the runtime loop down:
//! panics are captured, logged, and converted into ordinary failures.

use crate::actors::{HandlerError, HandlerResult};
use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Execute a function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
///
/// # Example
/// ```
/// use rightagent_core::recovery::with_recovery;
///
/// let result = with_recovery(|| Ok(7), "completion");
/// assert_eq!(result.unwrap(), 7);
/// ```
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(panic_payload.as_ref());
            tracing::error!(
                "panic_recovered: operation={}, panic={}",
                operation_name,
                panic_msg
            );

            Err(Error::internal(format!(
                "Panic in {}: {}",
                operation_name, panic_msg
            )))
        }
    }
}

/// Run an operation body or failure observer, turning a panic into a
/// `Panic`-class [`HandlerError`].
pub fn guard_handler<F, T>(operation: F) -> HandlerResult<T>
where
    F: FnOnce() -> HandlerResult<T>,
{
    catch_unwind(AssertUnwindSafe(operation))
        .unwrap_or_else(|panic_payload| Err(HandlerError::from_panic(panic_payload.as_ref())))
}

/// Extract panic message from panic payload.
pub fn extract_panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}
