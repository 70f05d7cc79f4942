//! Host-side error type for the Tessel bridge.
//!
//! `HostError` is what a host capability returns when it fails. It carries
//! the thrown value itself, so the bridge can store it in the handle table
//! and hand it to the guest through the pending-error channel. Guests see
//! the value, never a Rust type.

use crate::value::HostValue;

/// A value thrown by a host capability.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .value.debug_string())]
pub struct HostError {
    value: HostValue,
}

impl HostError {
    /// Throw an arbitrary host value.
    pub fn thrown(value: impl Into<HostValue>) -> Self {
        Self { value: value.into() }
    }

    /// Throw an `Error` value with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            value: HostValue::error(name, message),
        }
    }

    /// An operation received a value of the wrong kind.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Text could not be parsed.
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    /// A network-level operation failed.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new("NetworkError", message)
    }

    /// A lookup found nothing.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }

    pub fn value(&self) -> &HostValue {
        &self.value
    }

    pub fn into_value(self) -> HostValue {
        self.value
    }
}

impl From<HostValue> for HostError {
    fn from(value: HostValue) -> Self {
        Self { value }
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        Self::syntax_error(err.to_string())
    }
}
