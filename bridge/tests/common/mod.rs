//! Shared test helpers for integration tests.
//!
//! Provides a WAT guest runtime (bump allocator, destructor bookkeeping,
//! exported wrappers around every `tessel` import) and bridge factory
//! functions used across all integration test files.

#![allow(dead_code)]

use tessel_bridge::{Bridge, BridgeConfig, BridgeError, CallSurface, GuestSlice, Handle, Loader};

/// Scratch address for out records written by the host.
pub const OUT: i32 = 64;

/// Start of static guest data (data segments); the allocator starts at 1024.
pub const DATA: i32 = 512;

/// Every built-in import, bound to `$name`.
const BUILTIN_IMPORTS: &str = r#"
    (import "tessel" "object_drop_ref" (func $object_drop_ref (param i32)))
    (import "tessel" "object_clone_ref" (func $object_clone_ref (param i32) (result i32)))
    (import "tessel" "string_new" (func $string_new (param i32 i32) (result i32)))
    (import "tessel" "string_get" (func $string_get (param i32 i32)))
    (import "tessel" "number_new" (func $number_new (param f64) (result i32)))
    (import "tessel" "number_get" (func $number_get (param i32 i32)))
    (import "tessel" "boolean_get" (func $boolean_get (param i32) (result i32)))
    (import "tessel" "is_undefined" (func $is_undefined (param i32) (result i32)))
    (import "tessel" "is_null" (func $is_null (param i32) (result i32)))
    (import "tessel" "bytes_new" (func $bytes_new (param i32 i32) (result i32)))
    (import "tessel" "f32_array_new" (func $f32_array_new (param i32 i32) (result i32)))
    (import "tessel" "bytes_get" (func $bytes_get (param i32 i32)))
    (import "tessel" "json_parse" (func $json_parse (param i32 i32) (result i32)))
    (import "tessel" "json_serialize" (func $json_serialize (param i32 i32)))
    (import "tessel" "debug_string" (func $debug_string (param i32 i32)))
    (import "tessel" "closure_new" (func $closure_new (param i32 i32 i32 i32 i32) (result i32)))
    (import "tessel" "closure_drop" (func $closure_drop (param i32) (result i32)))
    (import "tessel" "log" (func $log (param i32 i32)))
    (import "tessel" "throw" (func $throw (param i32 i32)))
    (import "tessel" "rethrow" (func $rethrow (param i32)))
    (import "tessel" "exn_take" (func $exn_take (param i32)))
"#;

/// Memory, allocator, table slot 0 destructor, and peek/poke helpers.
const RUNTIME: &str = r#"
    (memory (export "memory") 1)
    (table $table (export "__tessel_table") 8 funcref)
    (elem (i32.const 0) $dtor)

    (global $bump (mut i32) (i32.const 1024))
    (global $dtor_calls (mut i32) (i32.const 0))
    (global $last_dtor_a (mut i32) (i32.const -1))

    ;; Bump allocator, 8-byte aligned, grows memory on demand.
    (func $malloc (export "__tessel_malloc") (param $size i32) (result i32)
        (local $ptr i32) (local $end i32) (local $have i32)
        global.get $bump
        local.set $ptr
        local.get $ptr
        local.get $size
        i32.add
        i32.const 7
        i32.add
        i32.const -8
        i32.and
        local.set $end
        memory.size
        i32.const 16
        i32.shl
        local.set $have
        local.get $end
        local.get $have
        i32.gt_u
        if
            local.get $end
            local.get $have
            i32.sub
            i32.const 65535
            i32.add
            i32.const 16
            i32.shr_u
            memory.grow
            i32.const -1
            i32.eq
            if
                unreachable
            end
        end
        local.get $end
        global.set $bump
        local.get $ptr)

    ;; Closure destructor: counts calls and remembers the environment word.
    (func $dtor (param $a i32) (param $b i32)
        global.get $dtor_calls
        i32.const 1
        i32.add
        global.set $dtor_calls
        local.get $a
        global.set $last_dtor_a)

    (func (export "dtor_calls") (result i32) global.get $dtor_calls)
    (func (export "last_dtor_a") (result i32) global.get $last_dtor_a)
    (func (export "peek") (param i32) (result i32) local.get 0 i32.load)
    (func (export "peek_f64") (param i32) (result f64) local.get 0 f64.load)
    (func (export "poke8") (param i32 i32) local.get 0 local.get 1 i32.store8)
    (func (export "poke_f32") (param i32 f32) local.get 0 local.get 1 f32.store)

    ;; Exported wrappers so tests can drive each import directly.
    (func (export "object_drop_ref") (param i32) local.get 0 call $object_drop_ref)
    (func (export "object_clone_ref") (param i32) (result i32) local.get 0 call $object_clone_ref)
    (func (export "string_new") (param i32 i32) (result i32) local.get 0 local.get 1 call $string_new)
    (func (export "string_get") (param i32 i32) local.get 0 local.get 1 call $string_get)
    (func (export "number_new") (param f64) (result i32) local.get 0 call $number_new)
    (func (export "number_get") (param i32 i32) local.get 0 local.get 1 call $number_get)
    (func (export "boolean_get") (param i32) (result i32) local.get 0 call $boolean_get)
    (func (export "is_undefined") (param i32) (result i32) local.get 0 call $is_undefined)
    (func (export "is_null") (param i32) (result i32) local.get 0 call $is_null)
    (func (export "bytes_new") (param i32 i32) (result i32) local.get 0 local.get 1 call $bytes_new)
    (func (export "f32_array_new") (param i32 i32) (result i32) local.get 0 local.get 1 call $f32_array_new)
    (func (export "bytes_get") (param i32 i32) local.get 0 local.get 1 call $bytes_get)
    (func (export "json_parse") (param i32 i32) (result i32) local.get 0 local.get 1 call $json_parse)
    (func (export "json_serialize") (param i32 i32) local.get 0 local.get 1 call $json_serialize)
    (func (export "debug_string") (param i32 i32) local.get 0 local.get 1 call $debug_string)
    (func (export "closure_drop") (param i32) (result i32) local.get 0 call $closure_drop)
    (func (export "log") (param i32 i32) local.get 0 local.get 1 call $log)
    (func (export "throw") (param i32 i32) local.get 0 local.get 1 call $throw)
    (func (export "rethrow") (param i32) local.get 0 call $rethrow)
    (func (export "exn_take") (param i32) local.get 0 call $exn_take)
"#;

/// Grow-by-copy reallocator on top of the bump allocator.
const REALLOC: &str = r#"
    (func $realloc (export "__tessel_realloc") (param $ptr i32) (param $old i32) (param $new i32) (result i32)
        (local $dst i32)
        local.get $new
        call $malloc
        local.set $dst
        local.get $dst
        local.get $ptr
        local.get $old
        memory.copy
        local.get $dst)
"#;

// ── Guest Builder ──

/// A test guest assembled from the shared runtime plus test-specific WAT.
pub struct Guest {
    realloc: bool,
    imports: String,
    start: String,
    body: String,
}

impl Guest {
    pub fn new() -> Self {
        Self {
            realloc: true,
            imports: String::new(),
            start: String::new(),
            body: String::new(),
        }
    }

    /// Leave out `__tessel_realloc`, forcing exact-size string encoding.
    pub fn without_realloc(mut self) -> Self {
        self.realloc = false;
        self
    }

    /// Extra imports (application capabilities).
    pub fn import(mut self, wat: &str) -> Self {
        self.imports.push_str(wat);
        self
    }

    /// Instructions run by `__tessel_start`.
    pub fn start(mut self, wat: &str) -> Self {
        self.start.push_str(wat);
        self
    }

    /// Extra module fields.
    pub fn body(mut self, wat: &str) -> Self {
        self.body.push_str(wat);
        self
    }

    pub fn wat(&self) -> String {
        let mut wat = String::from("(module\n");
        wat.push_str(BUILTIN_IMPORTS);
        wat.push_str(&self.imports);
        wat.push_str(RUNTIME);
        if self.realloc {
            wat.push_str(REALLOC);
        }
        wat.push_str("\n(func (export \"__tessel_start\")\n");
        wat.push_str(&self.start);
        wat.push_str(")\n");
        wat.push_str(&self.body);
        wat.push_str("\n)");
        wat
    }

    pub fn loader(&self, config: BridgeConfig, surface: &CallSurface) -> Result<Loader, BridgeError> {
        Loader::new(self.wat().as_bytes(), config, surface)
    }

    /// Instantiate without running the start routine.
    pub fn instantiate_with(&self, config: BridgeConfig, surface: &CallSurface) -> Result<Bridge, BridgeError> {
        self.loader(config, surface)?.instantiate()
    }

    /// Instantiate with default config and run the start routine.
    pub fn load(&self) -> Bridge {
        self.load_with(&CallSurface::new())
    }

    pub fn load_with(&self, surface: &CallSurface) -> Bridge {
        let mut bridge = self
            .instantiate_with(BridgeConfig::default(), surface)
            .expect("failed to instantiate guest");
        bridge.start().expect("guest start failed");
        bridge
    }
}

// ── Guest Memory Access ──

pub fn peek(bridge: &mut Bridge, addr: i32) -> i32 {
    bridge.call_export::<i32, i32>("peek", addr).unwrap()
}

pub fn peek_f64(bridge: &mut Bridge, addr: i32) -> f64 {
    bridge.call_export::<i32, f64>("peek_f64", addr).unwrap()
}

/// Read a `{ tag, ptr, len }` record.
pub fn read_slice_record(bridge: &mut Bridge, out: i32) -> Option<GuestSlice> {
    if peek(bridge, out) == 0 {
        return None;
    }
    Some(GuestSlice {
        ptr: peek(bridge, out + 4) as u32,
        len: peek(bridge, out + 8) as u32,
    })
}

/// Read a `{ tag, ptr, len }` record and decode the string it points at.
pub fn read_string_record(bridge: &mut Bridge, out: i32) -> Option<String> {
    let slice = read_slice_record(bridge, out)?;
    Some(bridge.decode_str(slice).unwrap())
}

/// Read a `{ tag, handle }` record.
pub fn read_handle_record(bridge: &mut Bridge, out: i32) -> Option<Handle> {
    if peek(bridge, out) == 0 {
        return None;
    }
    Some(peek(bridge, out + 4) as Handle)
}

// ── Call Shortcuts ──

/// Copy `text` into the guest and intern it through `string_new`.
pub fn guest_string(bridge: &mut Bridge, text: &str) -> Handle {
    let slice = bridge.encode_str(text).unwrap();
    bridge
        .call_export::<(i32, i32), i32>("string_new", (slice.ptr as i32, slice.len as i32))
        .unwrap() as Handle
}

pub fn dtor_calls(bridge: &mut Bridge) -> i32 {
    bridge.call_export::<(), i32>("dtor_calls", ()).unwrap()
}

pub fn last_dtor_a(bridge: &mut Bridge) -> i32 {
    bridge.call_export::<(), i32>("last_dtor_a", ()).unwrap()
}
