//! Host-to-guest calls through guest closures.
//!
//! The host invokes a closure by calling its invoker from the guest's
//! function table with the closure words `(a, b)` followed by the
//! marshalled arguments. The state borrow is never held across the guest
//! call, so the guest may call back into the host, including into the same
//! closure.

use tessel_hostapi::{FunctionRef, HostValue};
use wasmtime::{AsContextMut, Func, Ref, StoreContextMut, Val, ValType};

use crate::closure::{Invocation, Released, Shape, Teardown};
use crate::error::MarshalError;
use crate::exception::zero_val;
use crate::host_impl::HostState;

/// Look up a function in the guest's exported table.
pub fn table_func(cx: &mut StoreContextMut<'_, HostState>, index: u32) -> anyhow::Result<Func> {
    let table = cx.data().exports()?.table;
    match table.get(&mut *cx, u64::from(index)) {
        Some(Ref::Func(Some(func))) => Ok(func),
        _ => Err(MarshalError::MissingTableEntry(index).into()),
    }
}

/// Invoke a guest closure with host arguments.
///
/// The closure stays alive for the duration of the call even if it is
/// dropped from inside it. If the call gave up the last reference, the
/// guest destructor runs before this returns, whether or not the call
/// succeeded.
pub fn invoke(
    mut cx: impl AsContextMut<Data = HostState>,
    function: FunctionRef,
    args: &[HostValue],
) -> anyhow::Result<HostValue> {
    let mut cx = cx.as_context_mut();
    let invocation = cx.data_mut().closures.begin_invoke(function)?;
    let outcome = call_invoker(&mut cx, &invocation, args);
    let destroyed = match cx.data_mut().closures.end_invoke(invocation)? {
        Some(teardown) => run_destructor(&mut cx, teardown),
        None => Ok(()),
    };
    let value = outcome?;
    destroyed?;
    Ok(value)
}

/// Drop the host's reference to a closure, running the guest destructor
/// if it was the last one. Returns whether the closure was destroyed.
pub fn drop_closure(mut cx: impl AsContextMut<Data = HostState>, function: FunctionRef) -> anyhow::Result<bool> {
    let mut cx = cx.as_context_mut();
    match cx.data_mut().closures.release(function)? {
        Released::Destroyed(teardown) => {
            run_destructor(&mut cx, teardown)?;
            Ok(true)
        }
        Released::Retained => Ok(false),
    }
}

fn run_destructor(cx: &mut StoreContextMut<'_, HostState>, teardown: Teardown) -> anyhow::Result<()> {
    tracing::debug!(dtor = teardown.dtor, "running closure destructor");
    let dtor = table_func(cx, teardown.dtor)?;
    dtor.typed::<(i32, i32), ()>(&*cx)?
        .call(&mut *cx, (teardown.a as i32, teardown.b as i32))
}

fn call_invoker(
    cx: &mut StoreContextMut<'_, HostState>,
    invocation: &Invocation,
    args: &[HostValue],
) -> anyhow::Result<HostValue> {
    let func = table_func(cx, invocation.invoker)?;
    let ty = func.ty(&*cx);

    let mut params = vec![Val::I32(invocation.a as i32), Val::I32(invocation.b as i32)];
    match invocation.kind.shape {
        Shape::Handle => {
            let arg = args.first().cloned().unwrap_or_default();
            let handle = cx.data_mut().heap.add(arg)?;
            params.push(Val::I32(handle as i32));
        }
        Shape::Values => {
            for (i, param) in ty.params().skip(2).enumerate() {
                let arg = args.get(i).unwrap_or(&HostValue::Undefined);
                params.push(to_val(arg, &param)?);
            }
        }
    }

    let mut results = ty
        .results()
        .map(|result| zero_val(&result))
        .collect::<Result<Vec<_>, _>>()?;
    func.call(&mut *cx, &params, &mut results)?;

    let Some(result) = results.first() else {
        return Ok(HostValue::Undefined);
    };
    match invocation.kind.shape {
        Shape::Handle => {
            let handle = result.i32().ok_or_else(|| MarshalError::TypeMismatch {
                expected: "i32 handle",
                found: format!("{:?}", result),
            })?;
            Ok(cx.data_mut().heap.take(handle as u32)?)
        }
        Shape::Values => Ok(from_val(result)),
    }
}

/// Convert a host argument to the invoker's declared parameter type.
fn to_val(arg: &HostValue, ty: &ValType) -> Result<Val, MarshalError> {
    let number = match arg {
        HostValue::Bool(b) => f64::from(u8::from(*b)),
        none if none.is_like_none() => 0.0,
        other => other.as_f64().ok_or_else(|| MarshalError::TypeMismatch {
            expected: "number",
            found: other.type_name().to_string(),
        })?,
    };
    match ty {
        ValType::I32 => Ok(Val::I32(number as i32)),
        ValType::I64 => Ok(Val::I64(number as i64)),
        ValType::F32 => Ok(Val::F32((number as f32).to_bits())),
        ValType::F64 => Ok(Val::F64(number.to_bits())),
        other => Err(MarshalError::TypeMismatch {
            expected: "numeric parameter",
            found: format!("{:?}", other),
        }),
    }
}

fn from_val(val: &Val) -> HostValue {
    match val {
        Val::I32(v) => HostValue::Number(f64::from(*v)),
        Val::I64(v) => HostValue::Number(*v as f64),
        Val::F32(bits) => HostValue::Number(f64::from(f32::from_bits(*bits))),
        Val::F64(bits) => HostValue::Number(f64::from_bits(*bits)),
        _ => HostValue::Undefined,
    }
}
