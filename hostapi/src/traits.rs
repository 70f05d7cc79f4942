//! Host object trait — the extension point for capability-specific values.
//!
//! The bridge understands a closed set of value kinds (see [`HostValue`]).
//! Everything else a capability wants to hand to the guest (a socket, a
//! graphics context, a document node) implements `HostObject` and travels
//! as `HostValue::Object`. Type safety over those kinds belongs to the
//! capability that created them, not to the bridge.
//!
//! [`HostValue`]: crate::HostValue

use std::any::Any;
use std::fmt;

/// An opaque host-side object referenced by the guest through a handle.
pub trait HostObject: Any + Send + Sync + fmt::Debug {
    /// Short type name used in diagnostics, e.g. `"WebSocket"`.
    fn type_name(&self) -> &str;

    /// Upcast for downcasting back to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Textual description used by `debug_string`.
    fn describe(&self) -> String {
        self.type_name().to_string()
    }
}
