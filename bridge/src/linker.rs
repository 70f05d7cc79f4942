//! Host function registration via Wasmtime linker.
//!
//! Registers the built-in `tessel` primitives with the Wasmtime `Linker`,
//! then the application's [`CallSurface`]. Each primitive:
//! 1. Wraps the Caller in a [`CallContext`]
//! 2. Reads handles, strings and buffers through the handle table and views
//! 3. Performs the operation
//! 4. Returns a handle, or writes a tagged out record
//!
//! Marshalling failures trap. Only `json_parse` can fail recoverably; it
//! reports through the pending-error slot.

use tessel_hostapi::{HostError, HostValue};
use wasmtime::{Caller, Engine, Linker};

use crate::closure::{ClosureKind, Released};
use crate::error::{BridgeError, GuestFailure, UncaughtHostError};
use crate::exception;
use crate::host_impl::HostState;
use crate::surface::{CallContext, CallSurface, IMPORT_MODULE};

/// Build a linker with the built-in primitives and the application surface.
pub fn create_linker(engine: &Engine, surface: &CallSurface) -> Result<Linker<HostState>, BridgeError> {
    let mut linker = Linker::new(engine);
    register_host_functions(&mut linker)?;
    surface.link(&mut linker)?;
    Ok(linker)
}

/// Register all built-in `tessel` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    register_object_refs(linker)?;
    register_strings(linker)?;
    register_numbers(linker)?;
    register_predicates(linker)?;
    register_buffers(linker)?;
    register_json(linker)?;
    register_debug_string(linker)?;
    register_closures(linker)?;
    register_log(linker)?;
    register_errors(linker)?;
    Ok(())
}

// ── Handles ──

fn register_object_refs(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "object_drop_ref",
        |caller: Caller<'_, HostState>, handle: i32| {
            CallContext::new(caller).release(handle as u32);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "object_clone_ref",
        |mut caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<i32> {
            let cloned = caller.data_mut().heap.clone_ref(handle as u32)?;
            Ok(cloned as i32)
        },
    )?;
    Ok(())
}

// ── Strings and numbers ──

fn register_strings(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "string_new",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mut cx = CallContext::new(caller);
            let text = cx.string(ptr as u32, len as u32)?;
            Ok(cx.add(HostValue::String(text))? as i32)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "string_get",
        |caller: Caller<'_, HostState>, out: i32, handle: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let value = cx.value(handle as u32)?;
            let slice = match value.as_str() {
                Some(text) => Some(cx.alloc_string(text)?),
                None => None,
            };
            cx.write_slice(out as u32, slice)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_numbers(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "number_new",
        |mut caller: Caller<'_, HostState>, value: f64| -> anyhow::Result<i32> {
            Ok(caller.data_mut().heap.add(HostValue::Number(value))? as i32)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "number_get",
        |caller: Caller<'_, HostState>, out: i32, handle: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let number = match cx.value(handle as u32)? {
                HostValue::Number(n) => Some(n),
                _ => None,
            };
            cx.write_number(out as u32, number)?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── Predicates ──

fn register_predicates(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "boolean_get",
        |caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<i32> {
            let value = caller.data().heap.get(handle as u32)?;
            Ok(match value.as_bool() {
                Some(true) => 1,
                Some(false) => 0,
                None => 2,
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "is_undefined",
        |caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<i32> {
            Ok(caller.data().heap.get(handle as u32)?.is_undefined() as i32)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "is_null",
        |caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<i32> {
            Ok(caller.data().heap.get(handle as u32)?.is_null() as i32)
        },
    )?;
    Ok(())
}

// ── Buffers ──

fn register_buffers(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "bytes_new",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mut cx = CallContext::new(caller);
            let bytes = cx.bytes(ptr as u32, len as u32)?;
            Ok(cx.add(HostValue::Bytes(bytes))? as i32)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "f32_array_new",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mut cx = CallContext::new(caller);
            let floats = cx.f32s(ptr as u32, len as u32)?;
            Ok(cx.add(HostValue::F32Array(floats))? as i32)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bytes_get",
        |caller: Caller<'_, HostState>, out: i32, handle: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let slice = match cx.value(handle as u32)? {
                HostValue::Bytes(bytes) => Some(cx.alloc_bytes(&bytes)?),
                _ => None,
            };
            cx.write_slice(out as u32, slice)?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── JSON ──

fn register_json(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "json_parse",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mut cx = CallContext::new(caller);
            let text = cx.string(ptr as u32, len as u32)?;
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => Ok(cx.add(HostValue::from_json(json))? as i32),
                Err(err) => Ok(exception::catch(cx.state(), Err(HostError::from(err)))?),
            }
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "json_serialize",
        |caller: Caller<'_, HostState>, out: i32, handle: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let slice = match cx.value(handle as u32)?.to_json() {
                Some(json) => Some(cx.alloc_string(&serde_json::to_string(&json)?)?),
                None => None,
            };
            cx.write_slice(out as u32, slice)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_debug_string(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "debug_string",
        |caller: Caller<'_, HostState>, out: i32, handle: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let text = cx.value(handle as u32)?.debug_string();
            let slice = cx.alloc_string(&text)?;
            cx.write_slice(out as u32, Some(slice))?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── Closures ──

fn register_closures(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_new",
        |mut caller: Caller<'_, HostState>,
         a: i32,
         b: i32,
         dtor: i32,
         invoker: i32,
         kind: i32|
         -> anyhow::Result<i32> {
            let kind = ClosureKind::from_tag(kind)?;
            let state = caller.data_mut();
            let function = state
                .closures
                .create(a as u32, b as u32, dtor as u32, invoker as u32, kind);
            Ok(state.heap.add(HostValue::Function(function))? as i32)
        },
    )?;
    // The guest frees its own environment when this returns 1.
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_drop",
        |caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<i32> {
            let mut cx = CallContext::new(caller);
            let function = cx.function(handle as u32)?;
            cx.release(handle as u32);
            match cx.state().closures.release(function)? {
                Released::Destroyed(_) => Ok(1),
                Released::Retained => Ok(0),
            }
        },
    )?;
    Ok(())
}

// ── Logging and errors ──

fn register_log(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "log",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let message = cx.string(ptr as u32, len as u32)?;
            cx.state().add_log(message);
            Ok(())
        },
    )?;
    Ok(())
}

fn register_errors(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "throw",
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = CallContext::new(caller).string(ptr as u32, len as u32)?;
            Err(GuestFailure(message).into())
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "rethrow",
        |caller: Caller<'_, HostState>, handle: i32| -> anyhow::Result<()> {
            let value = CallContext::new(caller).take(handle as u32)?;
            Err(UncaughtHostError(value.debug_string()).into())
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "exn_take",
        |caller: Caller<'_, HostState>, out: i32| -> anyhow::Result<()> {
            let mut cx = CallContext::new(caller);
            let pending = exception::take_pending(cx.state());
            cx.write_handle(out as u32, pending)?;
            Ok(())
        },
    )?;
    Ok(())
}
