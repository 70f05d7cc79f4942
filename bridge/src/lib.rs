//! `tessel-bridge` — Wasmtime-based object and memory bridge.
//!
//! Lets a linear-memory guest module work with host values it can never
//! point at, and lets the host call back into the guest. It provides:
//!
//! - **Handles:** host values live in a handle table; the guest holds indices
//! - **Memory views:** typed little-endian views rebuilt after memory growth
//! - **Strings:** strict UTF-8 decoding and allocator-driven encoding
//! - **Closures:** reference-counted guest closures invocable from the host
//! - **Errors:** caught host errors become pending errors; guest failures
//!   become [`BridgeError`]s
//! - **Import whitelisting:** only `tessel` imports allowed, no WASI
//!
//! The primary entry points are [`Loader::instantiate`] and [`Bridge`].

pub mod error;
pub mod config;
pub mod heap;
pub mod memory;
pub mod strings;
pub mod closure;
pub mod host_impl;
pub mod exception;
pub mod callback;
pub mod surface;
pub mod validation;
pub mod linker;
pub mod runtime;

pub use error::{BridgeError, MarshalError};
pub use config::BridgeConfig;
pub use heap::Handle;
pub use strings::GuestSlice;
pub use surface::{CallContext, CallSurface, Capability};
pub use runtime::{Bridge, Loader};
