//! Host values referenced by the guest through handles.
//!
//! `HostValue` is the closed set of kinds the bridge itself can marshal,
//! plus `Object` for anything a capability registers on its own. Values are
//! cheap to clone: objects are shared through `Arc`, so the handle table and
//! the host hold the same object.

use std::fmt;
use std::sync::Arc;

use crate::traits::HostObject;

/// Reference to a guest closure registered with the bridge.
///
/// The generation distinguishes a live closure from an earlier one that
/// occupied the same slot and has since been torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    pub index: u32,
    pub generation: u32,
}

/// A host-owned value.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// A byte buffer copied out of (or destined for) guest memory.
    Bytes(Vec<u8>),
    /// A float buffer copied out of guest memory.
    F32Array(Vec<f32>),
    /// A structured value produced by `json_parse` (arrays and objects only).
    Json(serde_json::Value),
    /// A thrown error.
    Error { name: String, message: String },
    /// A guest closure made invocable from the host.
    Function(FunctionRef),
    /// A capability-specific object.
    Object(Arc<dyn HostObject>),
}

impl HostValue {
    /// Wrap a capability object.
    pub fn object<O: HostObject>(object: O) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Build an error value.
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `undefined` or `null`.
    pub fn is_like_none(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<FunctionRef> {
        match self {
            Self::Function(f) => Some(*f),
            _ => None,
        }
    }

    /// Downcast an `Object` value to its concrete capability type.
    pub fn downcast_object<O: HostObject>(&self) -> Option<&O> {
        match self {
            Self::Object(obj) => obj.as_any().downcast_ref::<O>(),
            _ => None,
        }
    }

    /// Kind name used in diagnostics and type errors.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "Uint8Array",
            Self::F32Array(_) => "Float32Array",
            Self::Json(serde_json::Value::Array(_)) => "Array",
            Self::Json(_) => "Object",
            Self::Error { .. } => "Error",
            Self::Function(_) => "Function",
            Self::Object(obj) => obj.type_name(),
        }
    }

    /// Human-readable description of the value.
    ///
    /// Used for guest-requested debug output and for failure messages that
    /// must name the failed value rather than its handle.
    pub fn debug_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => format!("\"{}\"", s),
            Self::Bytes(b) => format!("Uint8Array({})", b.len()),
            Self::F32Array(f) => format!("Float32Array({})", f.len()),
            Self::Json(json) => debug_json(json),
            Self::Error { name, message } => format!("{}: {}", name, message),
            Self::Function(_) => "Function".to_string(),
            Self::Object(obj) => obj.describe(),
        }
    }

    /// Build a host value from parsed JSON.
    ///
    /// Scalars map onto their native kinds; arrays and objects stay as JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }

    /// Serialize to JSON, or `None` for kinds JSON cannot represent.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Null => Some(serde_json::Value::Null),
            Self::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Self::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            Self::String(s) => Some(serde_json::Value::String(s.clone())),
            Self::Json(json) => Some(json.clone()),
            Self::Bytes(b) => Some(serde_json::Value::Array(
                b.iter().map(|&x| serde_json::Value::from(x)).collect(),
            )),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        n.to_string()
    }
}

fn debug_json(json: &serde_json::Value) -> String {
    match json {
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items
                .iter()
                .map(|item| HostValue::from_json(item.clone()).debug_string())
                .collect();
            format!("[{}]", inner.join(", "))
        }
        other => format!("Object({})", other),
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::F32Array(a), Self::F32Array(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (
                Self::Error { name: an, message: am },
                Self::Error { name: bn, message: bm },
            ) => an == bn && am == bm,
            (Self::Function(a), Self::Function(b)) => a == b,
            // Objects compare by identity.
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl<O: HostObject> From<Arc<O>> for HostValue {
    fn from(obj: Arc<O>) -> Self {
        Self::Object(obj)
    }
}
