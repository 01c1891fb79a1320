//! Script-level error values
//!
//! Faults raised inside a handler are surfaced to the script as `Val::Error`
//! so a `Try` statement can catch them. The codes below are stable and are
//! what host code and tests match on.

use serde::{Deserialize, Serialize};

pub const TYPE_ERROR: &str = "TYPE_ERROR";
pub const UNDEFINED_VARIABLE: &str = "UNDEFINED_VARIABLE";
pub const UNDEFINED_FUNCTION: &str = "UNDEFINED_FUNCTION";
pub const UNDEFINED_STATE: &str = "UNDEFINED_STATE";
pub const ARITY_MISMATCH: &str = "ARITY_MISMATCH";
pub const INDEX_OUT_OF_BOUNDS: &str = "INDEX_OUT_OF_BOUNDS";
pub const DIVISION_BY_ZERO: &str = "DIVISION_BY_ZERO";
pub const BAD_GLOBAL_SLOT: &str = "BAD_GLOBAL_SLOT";
pub const HEAP_EXCEEDED: &str = "HEAP_EXCEEDED";
pub const STACK_EXCEEDED: &str = "STACK_EXCEEDED";
pub const HOST_ERROR: &str = "HOST_ERROR";
pub const THROWN: &str = "THROWN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(TYPE_ERROR, message)
    }

    /// True for faults raised by the heap or stack accountant
    pub fn is_resource_exceeded(&self) -> bool {
        self.code == HEAP_EXCEEDED || self.code == STACK_EXCEEDED
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<crate::errors::ResourceExceeded> for ErrorInfo {
    fn from(e: crate::errors::ResourceExceeded) -> Self {
        let code = match e.kind {
            crate::errors::ResourceKind::Heap => HEAP_EXCEEDED,
            crate::errors::ResourceKind::Stack => STACK_EXCEEDED,
        };
        ErrorInfo::new(code, e.to_string())
    }
}
