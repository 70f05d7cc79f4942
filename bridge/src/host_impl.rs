//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `HostState` owns everything the host keeps on the guest's behalf: the
//! handle table, the memory view cache, live closures, the pending error
//! slot and recorded log lines. It lives inside `Store<HostState>` for the
//! lifetime of one [`Bridge`](crate::runtime::Bridge), so two bridges never
//! share state.

use tessel_hostapi::HostLimits;
use wasmtime::{
    AsContextMut, Memory, StoreContextMut, StoreLimits, StoreLimitsBuilder, Table, TypedFunc,
};

use crate::closure::ClosureTable;
use crate::config::BridgeConfig;
use crate::error::MarshalError;
use crate::heap::{Handle, HandleTable};
use crate::memory::{GuestMemory, MemoryViews, WASM_PAGE_SIZE};

/// Guest exports the host calls back into, resolved once after
/// instantiation.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    pub malloc: TypedFunc<i32, i32>,
    pub realloc: Option<TypedFunc<(i32, i32, i32), i32>>,
    pub table: Table,
    pub start: TypedFunc<(), ()>,
}

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct HostState {
    /// Host values referenced by the guest.
    pub heap: HandleTable,
    /// Typed views over guest memory, rebuilt after growth.
    pub views: MemoryViews,
    /// Guest closures the host may invoke.
    pub closures: ClosureTable,
    /// Handle of the most recent caught host error, until `exn_take`.
    pub pending_error: Option<Handle>,
    /// Log lines emitted by the guest.
    pub logs: Vec<String>,
    pub limits: HostLimits,
    pub enable_guest_logs: bool,
    /// Memory and table growth limits enforced by Wasmtime.
    pub store_limits: StoreLimits,
    /// Set by the loader right after instantiation.
    pub exports: Option<GuestExports>,
}

impl HostState {
    pub fn new(config: &BridgeConfig) -> Self {
        let store_limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_pages as usize * WASM_PAGE_SIZE)
            .table_elements(config.max_table_elements as usize)
            .build();
        Self {
            heap: HandleTable::new(config.limits.max_handles),
            views: MemoryViews::new(),
            closures: ClosureTable::new(),
            pending_error: None,
            logs: Vec::new(),
            limits: config.limits.clone(),
            enable_guest_logs: config.enable_guest_logs,
            store_limits,
            exports: None,
        }
    }

    pub fn exports(&self) -> Result<&GuestExports, MarshalError> {
        self.exports.as_ref().ok_or(MarshalError::MissingExport("memory"))
    }

    /// Record a log line. Enforces log count and line length limits.
    pub fn add_log(&mut self, message: String) {
        tracing::info!(target: "tessel::guest", "{}", message);
        if !self.enable_guest_logs {
            return;
        }
        if message.len() > self.limits.max_log_line_len {
            return; // Silently drop oversized lines
        }
        if self.logs.len() >= self.limits.max_log_lines as usize {
            return; // Silently drop if at limit
        }
        self.logs.push(message);
    }
}

/// Guest memory and allocator, reached through a store context.
pub struct GuestHeap<'a> {
    cx: StoreContextMut<'a, HostState>,
    exports: GuestExports,
}

impl<'a> GuestHeap<'a> {
    pub fn new(mut cx: StoreContextMut<'a, HostState>) -> Result<Self, MarshalError> {
        let exports = cx.data_mut().exports()?.clone();
        Ok(Self { cx, exports })
    }

    pub fn state(&mut self) -> &mut HostState {
        self.cx.data_mut()
    }
}

impl GuestMemory for GuestHeap<'_> {
    fn parts(&mut self) -> (&mut [u8], &mut MemoryViews) {
        let (data, state) = self.exports.memory.data_and_store_mut(self.cx.as_context_mut());
        (data, &mut state.views)
    }

    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        let ptr = self.exports.malloc.call(&mut self.cx, size as i32)?;
        Ok(ptr as u32)
    }

    fn has_realloc(&self) -> bool {
        self.exports.realloc.is_some()
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32) -> anyhow::Result<u32> {
        let realloc = self
            .exports
            .realloc
            .as_ref()
            .ok_or(MarshalError::MissingExport("__tessel_realloc"))?;
        let ptr = realloc.call(&mut self.cx, (ptr as i32, old_size as i32, new_size as i32))?;
        Ok(ptr as u32)
    }
}
