//! Sampler bookkeeping failures.
//!
//! A count that would go negative means the tables no longer describe the
//! current assignments. There is nothing to recover, so these are raised as
//! panics carrying an [`InvariantViolation`] payload. Code that catches
//! worker panics checks the payload and re-raises these.

use std::any::Any;
use std::fmt;

/// Payload of a fatal bookkeeping panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// What went wrong, for the operator
    pub what: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sampler invariant violated: {}", self.what)
    }
}

impl std::error::Error for InvariantViolation {}

/// Log and raise an invariant violation.
pub fn violation(what: impl Into<String>) -> ! {
    let v = InvariantViolation { what: what.into() };
    log::error!("{}", v);
    std::panic::panic_any(v)
}

/// Is this caught panic payload an invariant violation?
pub fn is_violation(payload: &(dyn Any + Send)) -> bool {
    payload.downcast_ref::<InvariantViolation>().is_some()
}

/// Best-effort message of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(v) = payload.downcast_ref::<InvariantViolation>() {
        v.to_string()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
