//! Bridge error types.
//!
//! Three kinds of failure cross the bridge:
//!
//! - [`MarshalError`]: a value could not be moved across the boundary
//!   (bad handle, out-of-bounds memory, invalid UTF-8). Unrecoverable for
//!   the current call: the host function traps.
//! - [`GuestFailure`]: the guest raised its own failure through `throw`.
//! - [`UncaughtHostError`]: a host capability failed outside the error
//!   channel, or the guest re-raised a host value.
//!
//! Inside Wasmtime these travel as `anyhow::Error`; [`classify`] maps them
//! back to a [`BridgeError`] at the public entry points.

use tessel_hostapi::HostError;
use wasmtime::Trap;

/// Top-level error type for the bridge crate.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A value could not be marshalled across the boundary.
    #[error("marshalling error: {0}")]
    Marshal(#[from] MarshalError),

    /// The guest raised a failure.
    #[error("guest failed: {0}")]
    GuestFailed(String),

    /// A host error escaped the error channel.
    #[error("host threw: {0}")]
    HostThrew(String),

    /// Memory setup failed.
    #[error("memory error: {0}")]
    MemoryError(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),
}

/// Failure to move a value across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("handle {0} is out of range")]
    InvalidHandle(u32),

    #[error("handle table is full ({0} slots)")]
    HandleOverflow(u32),

    #[error("memory access [{ptr}, {ptr}+{len}) out of bounds (memory size {size})")]
    OutOfBounds { ptr: u32, len: u32, size: usize },

    #[error("invalid UTF-8 at [{ptr}, {ptr}+{len})")]
    InvalidUtf8 { ptr: u32, len: u32 },

    #[error("closure invoked after being destroyed")]
    ClosureDestroyed,

    #[error("unknown closure kind {0}")]
    BadClosureKind(i32),

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("no function at table index {0}")]
    MissingTableEntry(u32),

    #[error("guest export '{0}' missing or mistyped")]
    MissingExport(&'static str),

    #[error("guest allocator returned an unusable pointer")]
    AllocationFailed,
}

/// A failure raised by the guest itself through the `throw` import.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct GuestFailure(pub String);

/// A host error that was not routed through the pending-error channel.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct UncaughtHostError(pub String);

impl From<HostError> for UncaughtHostError {
    fn from(err: HostError) -> Self {
        Self(err.value().debug_string())
    }
}

/// Map an error that crossed Wasmtime back into a `BridgeError`.
///
/// Guest failures, escaped host errors and marshalling errors keep their
/// identity through traps; fuel exhaustion becomes `FuelExhausted`; any
/// other trap becomes `GuestTrapped`.
pub fn classify(err: anyhow::Error) -> BridgeError {
    if let Some(failure) = err.downcast_ref::<GuestFailure>() {
        return BridgeError::GuestFailed(failure.0.clone());
    }
    if let Some(host) = err.downcast_ref::<UncaughtHostError>() {
        return BridgeError::HostThrew(host.0.clone());
    }
    if let Some(marshal) = err.downcast_ref::<MarshalError>() {
        return BridgeError::Marshal(marshal.clone());
    }
    if let Some(Trap::OutOfFuel) = err.downcast_ref::<Trap>() {
        return BridgeError::FuelExhausted;
    }
    BridgeError::GuestTrapped(format!("{:#}", err))
}

/// Handle a guest call result, converting traps to `BridgeError`.
pub fn handle_trap<R>(result: Result<R, anyhow::Error>) -> Result<R, BridgeError> {
    result.map_err(classify)
}
