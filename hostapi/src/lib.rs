//! `tessel-hostapi` — host-side value model and error types for the Tessel bridge.
//!
//! This crate defines what the host can hand to a guest through the handle
//! table, independent of the Wasmtime runtime that does the marshalling.
//! It provides:
//!
//! - `HostValue`: the closed set of value kinds the bridge understands
//! - `HostObject` trait: the open extension point for capability-specific objects
//! - `FunctionRef`: a reference to a guest closure made invocable by the host
//! - `HostError`: a thrown host value, caught by the bridge's error channel
//! - `HostLimits`: resource limits for one bridge instance

pub mod error;
pub mod types;
pub mod traits;
pub mod value;

// Re-export commonly used types at the crate root.
pub use error::HostError;
pub use types::HostLimits;
pub use traits::HostObject;
pub use value::{FunctionRef, HostValue};
