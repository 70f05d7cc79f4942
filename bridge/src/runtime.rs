//! Bridge runtime — Wasmtime engine, module loading, and guest instances.
//!
//! A [`Loader`] compiles and validates a guest module once. Each call to
//! [`Loader::instantiate`] creates a fresh store and instance with its own
//! handle table, closures and pending-error slot, and returns a
//! [`Bridge`] for driving it.

use std::path::Path;

use tessel_hostapi::{FunctionRef, HostValue};
use wasmtime::{AsContextMut, Config, Engine, Instance, Linker, Module, Store, WasmParams, WasmResults};

use crate::callback;
use crate::config::BridgeConfig;
use crate::error::{handle_trap, BridgeError, MarshalError};
use crate::heap::Handle;
use crate::host_impl::{GuestExports, GuestHeap, HostState};
use crate::linker::create_linker;
use crate::strings::{self, GuestSlice};
use crate::surface::CallSurface;
use crate::validation::{
    validate_module, MALLOC_EXPORT, MEMORY_EXPORT, REALLOC_EXPORT, START_EXPORT, TABLE_EXPORT,
};

/// A compiled and validated guest module.
pub struct Loader {
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    config: BridgeConfig,
}

impl Loader {
    /// Compile a guest from WASM bytecode (or WAT text).
    ///
    /// Validates the module's exports and imports before accepting.
    pub fn new(wasm_bytes: &[u8], config: BridgeConfig, surface: &CallSurface) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)?;
        Self::from_module(engine, module, config, surface)
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: BridgeConfig, surface: &CallSurface) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        Self::from_module(engine, module, config, surface)
    }

    fn from_module(
        engine: Engine,
        module: Module,
        config: BridgeConfig,
        surface: &CallSurface,
    ) -> Result<Self, BridgeError> {
        validate_module(&module)?;
        let linker = create_linker(&engine, surface)?;
        Ok(Self {
            engine,
            module,
            linker,
            config,
        })
    }

    /// Create a fresh guest instance.
    pub fn instantiate(&self) -> Result<Bridge, BridgeError> {
        let mut store = Store::new(&self.engine, HostState::new(&self.config));
        store.limiter(|state| &mut state.store_limits);
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let instance = self.linker.instantiate(&mut store, &self.module)?;
        let exports = resolve_exports(&instance, &mut store)?;
        store.data_mut().exports = Some(exports);
        tracing::debug!(
            fuel_limit = ?self.config.fuel_limit,
            max_memory_pages = self.config.max_memory_pages,
            "guest instantiated"
        );

        Ok(Bridge {
            store,
            instance,
            started: false,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// One running guest instance.
pub struct Bridge {
    store: Store<HostState>,
    instance: Instance,
    started: bool,
}

impl Bridge {
    /// Run the guest's start routine. Subsequent calls do nothing.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let start = self.store.data().exports()?.start.clone();
        handle_trap(start.call(&mut self.store, ()))
    }

    /// Invoke a guest closure.
    pub fn invoke(&mut self, function: FunctionRef, args: &[HostValue]) -> Result<HostValue, BridgeError> {
        handle_trap(callback::invoke(&mut self.store, function, args))
    }

    /// Drop the host's reference to a closure. Returns whether it was destroyed.
    pub fn drop_closure(&mut self, function: FunctionRef) -> Result<bool, BridgeError> {
        handle_trap(callback::drop_closure(&mut self.store, function))
    }

    /// Take an extra reference to a closure, for a second subscription.
    pub fn share_closure(&mut self, function: FunctionRef) -> Result<(), BridgeError> {
        Ok(self.store.data_mut().closures.retain(function)?)
    }

    /// Hand a host value to the guest.
    pub fn add_value(&mut self, value: HostValue) -> Result<Handle, BridgeError> {
        Ok(self.store.data_mut().heap.add(value)?)
    }

    pub fn value(&self, handle: Handle) -> Result<HostValue, BridgeError> {
        Ok(self.store.data().heap.get(handle)?.clone())
    }

    pub fn take_value(&mut self, handle: Handle) -> Result<HostValue, BridgeError> {
        Ok(self.store.data_mut().heap.take(handle)?)
    }

    pub fn release(&mut self, handle: Handle) {
        self.store.data_mut().heap.release(handle);
    }

    /// Copy a string into guest-allocated memory.
    pub fn encode_str(&mut self, text: &str) -> Result<GuestSlice, BridgeError> {
        let mut heap = GuestHeap::new(self.store.as_context_mut())?;
        handle_trap(strings::encode(&mut heap, text))
    }

    pub fn decode_str(&mut self, slice: GuestSlice) -> Result<String, BridgeError> {
        let memory = self.store.data().exports()?.memory;
        let (data, state) = memory.data_and_store_mut(&mut self.store);
        Ok(strings::decode(&mut state.views, data, slice.ptr, slice.len)?)
    }

    /// The error waiting for `exn_take`, if any. Does not clear it.
    pub fn pending_error(&self) -> Option<HostValue> {
        let state = self.store.data();
        let handle = state.pending_error?;
        state.heap.get(handle).ok().cloned()
    }

    /// Guest log lines recorded so far.
    pub fn logs(&self) -> &[String] {
        &self.store.data().logs
    }

    pub fn live_handles(&self) -> usize {
        self.store.data().heap.live()
    }

    pub fn live_closures(&self) -> usize {
        self.store.data().closures.live()
    }

    /// Remaining fuel, when metering is enabled.
    pub fn fuel_remaining(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Call any other guest export.
    pub fn call_export<Params, Results>(&mut self, name: &str, params: Params) -> Result<Results, BridgeError>
    where
        Params: WasmParams,
        Results: WasmResults,
    {
        let func = self
            .instance
            .get_typed_func::<Params, Results>(&mut self.store, name)?;
        handle_trap(func.call(&mut self.store, params))
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }
}

/// Create a Wasmtime engine for guest execution.
fn create_engine(config: &BridgeConfig) -> Result<Engine, BridgeError> {
    let mut wasm_config = Config::new();

    // Fuel metering only when a limit is configured
    wasm_config.consume_fuel(config.fuel_limit.is_some());

    // One memory, one thread
    wasm_config.wasm_threads(false);
    wasm_config.wasm_multi_memory(false);

    Ok(Engine::new(&wasm_config)?)
}

fn resolve_exports(instance: &Instance, store: &mut Store<HostState>) -> Result<GuestExports, BridgeError> {
    let memory = instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or_else(|| BridgeError::MemoryError("no memory export".into()))?;
    let malloc = instance.get_typed_func::<i32, i32>(&mut *store, MALLOC_EXPORT)?;
    let realloc = match instance.get_func(&mut *store, REALLOC_EXPORT) {
        Some(func) => Some(func.typed::<(i32, i32, i32), i32>(&*store)?),
        None => None,
    };
    let table = instance
        .get_table(&mut *store, TABLE_EXPORT)
        .ok_or(MarshalError::MissingExport(TABLE_EXPORT))?;
    let start = instance.get_typed_func::<(), ()>(&mut *store, START_EXPORT)?;
    Ok(GuestExports {
        memory,
        malloc,
        realloc,
        table,
        start,
    })
}
