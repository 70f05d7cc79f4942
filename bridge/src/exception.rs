//! Host error channel.
//!
//! A host function registered as catching never traps on a [`HostError`].
//! Instead the thrown value goes into the handle table, its handle into the
//! pending slot, and the guest receives a zero sentinel. The guest then
//! calls `exn_take` to learn whether the call failed and to take ownership
//! of the error handle.

use tessel_hostapi::HostError;
use wasmtime::{Val, ValType};

use crate::error::MarshalError;
use crate::heap::Handle;
use crate::host_impl::HostState;

/// The value a failed call returns to the guest.
pub trait Sentinel {
    fn sentinel() -> Self;
}

macro_rules! zero_sentinel {
    ($($ty:ty => $zero:expr),* $(,)?) => {
        $(impl Sentinel for $ty {
            fn sentinel() -> Self {
                $zero
            }
        })*
    };
}

zero_sentinel! {
    () => (),
    i32 => 0,
    u32 => 0,
    i64 => 0,
    f32 => 0.0,
    f64 => 0.0,
}

/// Sentinel for a dynamically typed result slot.
pub fn zero_val(ty: &ValType) -> Result<Val, MarshalError> {
    match ty {
        ValType::I32 => Ok(Val::I32(0)),
        ValType::I64 => Ok(Val::I64(0)),
        ValType::F32 => Ok(Val::F32(0f32.to_bits())),
        ValType::F64 => Ok(Val::F64(0f64.to_bits())),
        other => Err(MarshalError::TypeMismatch {
            expected: "numeric type",
            found: format!("{:?}", other),
        }),
    }
}

/// Put a thrown host value into the pending slot.
///
/// A still-pending earlier error is released first; the guest never took it.
pub fn set_pending(state: &mut HostState, err: HostError) -> Result<Handle, MarshalError> {
    tracing::debug!(error = %err, "host error caught");
    let handle = state.heap.add(err.into_value())?;
    if let Some(stale) = state.pending_error.replace(handle) {
        tracing::warn!(handle = stale, "pending error overwritten before exn_take");
        state.heap.release(stale);
    }
    Ok(handle)
}

/// Clear the pending slot, handing the error handle to the caller.
pub fn take_pending(state: &mut HostState) -> Option<Handle> {
    state.pending_error.take()
}

/// Unwrap a host result, routing a thrown error into the pending slot.
pub fn catch<T: Sentinel>(state: &mut HostState, result: Result<T, HostError>) -> Result<T, MarshalError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            set_pending(state, err)?;
            Ok(T::sentinel())
        }
    }
}
