//! Application host functions exposed to the guest.
//!
//! A [`CallSurface`] collects host functions under the `tessel` import
//! module. Each function body receives a [`CallContext`] with the handle
//! table, string and buffer marshalling, closure invocation and guest
//! allocation, so a capability only deals in host values.
//!
//! A function registered with `catch` turns a [`HostError`] into a pending
//! error and zero results. Without `catch` a host error traps and surfaces
//! as [`BridgeError::HostThrew`](crate::error::BridgeError::HostThrew).
//! Marshalling errors always trap.

use std::sync::Arc;

use tessel_hostapi::{FunctionRef, HostError, HostValue};
use wasmtime::{AsContextMut, Caller, FuncType, Linker, Val, ValType};

use crate::callback;
use crate::error::{MarshalError, UncaughtHostError};
use crate::exception;
use crate::heap::Handle;
use crate::host_impl::{GuestHeap, HostState};
use crate::strings::{self, GuestSlice};

/// Import module for every host function.
pub const IMPORT_MODULE: &str = "tessel";

/// Signature of an application host function.
pub type HostFn = dyn Fn(&mut CallContext<'_>, &[Val], &mut [Val]) -> anyhow::Result<()> + Send + Sync;

/// A group of host functions an application exposes together.
pub trait Capability {
    fn register(&self, surface: &mut CallSurface);
}

#[derive(Clone)]
struct Registration {
    name: String,
    params: Vec<ValType>,
    results: Vec<ValType>,
    catch: bool,
    func: Arc<HostFn>,
}

/// The set of application host functions linked into every instance.
#[derive(Clone, Default)]
pub struct CallSurface {
    funcs: Vec<Registration>,
}

impl CallSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function `tessel::<name>`.
    pub fn func<F>(
        &mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = ValType>,
        results: impl IntoIterator<Item = ValType>,
        catch: bool,
        f: F,
    ) -> &mut Self
    where
        F: Fn(&mut CallContext<'_>, &[Val], &mut [Val]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.funcs.push(Registration {
            name: name.into(),
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
            catch,
            func: Arc::new(f),
        });
        self
    }

    /// Register every function of a capability.
    pub fn capability(&mut self, capability: &dyn Capability) -> &mut Self {
        capability.register(self);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.iter().any(|reg| reg.name == name)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Define every registered function in `linker`.
    pub fn link(&self, linker: &mut Linker<HostState>) -> anyhow::Result<()> {
        for reg in &self.funcs {
            let ty = FuncType::new(linker.engine(), reg.params.clone(), reg.results.clone());
            let name = reg.name.clone();
            let reg = reg.clone();
            linker.func_new(IMPORT_MODULE, &name, ty, move |caller, params, results| {
                let mut cx = CallContext::new(caller);
                let Err(err) = (reg.func)(&mut cx, params, results) else {
                    return Ok(());
                };
                match err.downcast::<HostError>() {
                    Ok(host) if reg.catch => {
                        exception::set_pending(cx.state(), host)?;
                        for (slot, ty) in results.iter_mut().zip(&reg.results) {
                            *slot = exception::zero_val(ty)?;
                        }
                        Ok(())
                    }
                    Ok(host) => {
                        tracing::debug!(function = %reg.name, error = %host, "uncaught host error");
                        Err(UncaughtHostError::from(host).into())
                    }
                    Err(other) => Err(other),
                }
            })?;
        }
        Ok(())
    }
}

/// Everything a host function can do during one guest call.
pub struct CallContext<'a> {
    caller: Caller<'a, HostState>,
}

impl<'a> CallContext<'a> {
    pub fn new(caller: Caller<'a, HostState>) -> Self {
        Self { caller }
    }

    pub fn state(&mut self) -> &mut HostState {
        self.caller.data_mut()
    }

    // ── Handles ──

    /// Clone the value behind a handle.
    pub fn value(&mut self, handle: Handle) -> Result<HostValue, MarshalError> {
        self.state().heap.get(handle).cloned()
    }

    pub fn add(&mut self, value: HostValue) -> Result<Handle, MarshalError> {
        self.state().heap.add(value)
    }

    /// Take the value behind a handle, releasing the handle.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue, MarshalError> {
        self.state().heap.take(handle)
    }

    pub fn release(&mut self, handle: Handle) {
        self.state().heap.release(handle);
    }

    /// The closure behind a handle.
    pub fn function(&mut self, handle: Handle) -> Result<FunctionRef, MarshalError> {
        let value = self.value(handle)?;
        value.as_function().ok_or_else(|| MarshalError::TypeMismatch {
            expected: "Function",
            found: value.type_name().to_string(),
        })
    }

    // ── Guest memory ──

    fn memory(&mut self) -> Result<(&mut [u8], &mut HostState), MarshalError> {
        let memory = self.caller.data().exports()?.memory;
        Ok(memory.data_and_store_mut(self.caller.as_context_mut()))
    }

    /// Read a UTF-8 string out of guest memory.
    pub fn string(&mut self, ptr: u32, len: u32) -> Result<String, MarshalError> {
        let (data, state) = self.memory()?;
        strings::decode(&mut state.views, data, ptr, len)
    }

    /// Read an optional string; `(0, 0)` is absent.
    pub fn optional_string(&mut self, ptr: u32, len: u32) -> Result<Option<String>, MarshalError> {
        let (data, state) = self.memory()?;
        strings::decode_optional(&mut state.views, data, ptr, len)
    }

    pub fn bytes(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, MarshalError> {
        let (data, state) = self.memory()?;
        strings::read_bytes(&mut state.views, data, ptr, len)
    }

    pub fn f32s(&mut self, ptr: u32, count: u32) -> Result<Vec<f32>, MarshalError> {
        let (data, state) = self.memory()?;
        strings::read_f32s(&mut state.views, data, ptr, count)
    }

    /// Copy a string into memory allocated by the guest.
    pub fn alloc_string(&mut self, text: &str) -> anyhow::Result<GuestSlice> {
        let mut heap = GuestHeap::new(self.caller.as_context_mut())?;
        strings::encode(&mut heap, text)
    }

    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<GuestSlice> {
        let mut heap = GuestHeap::new(self.caller.as_context_mut())?;
        strings::encode_bytes(&mut heap, bytes)
    }

    /// Write `{ tag, ptr, len }` at `out`.
    pub fn write_slice(&mut self, out: u32, slice: Option<GuestSlice>) -> Result<(), MarshalError> {
        let (data, state) = self.memory()?;
        strings::store_slice_record(&mut state.views, data, out, slice)
    }

    /// Write `{ tag: i32 @0, value: f64 @8 }` at `out`.
    pub fn write_number(&mut self, out: u32, number: Option<f64>) -> Result<(), MarshalError> {
        let (data, state) = self.memory()?;
        state.views.view_mut::<i32>(data).store(out, number.is_some() as i32)?;
        state
            .views
            .view_mut::<f64>(data)
            .store(out + 8, number.unwrap_or(0.0))
    }

    /// Write `{ tag: i32 @0, handle: i32 @4 }` at `out`.
    pub fn write_handle(&mut self, out: u32, handle: Option<Handle>) -> Result<(), MarshalError> {
        let (data, state) = self.memory()?;
        let mut ints = state.views.view_mut::<i32>(data);
        ints.store(out, handle.is_some() as i32)?;
        ints.store(out + 4, handle.unwrap_or(0) as i32)
    }

    // ── Closures ──

    /// Call back into a guest closure.
    pub fn invoke(&mut self, function: FunctionRef, args: &[HostValue]) -> anyhow::Result<HostValue> {
        callback::invoke(&mut self.caller, function, args)
    }

    /// Give up the host's reference to a closure.
    pub fn drop_closure(&mut self, function: FunctionRef) -> anyhow::Result<bool> {
        callback::drop_closure(&mut self.caller, function)
    }
}
