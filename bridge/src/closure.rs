//! Reference-counted state for guest closures handed to the host.
//!
//! A guest closure is two opaque words `(a, b)` plus two indices into the
//! guest function table: an invoker that calls the closure body and a
//! destructor that frees its environment. The host may hold onto the
//! closure long after the guest call that created it returned, and may
//! invoke it re-entrantly, so the state carries a reference count.
//!
//! Every in-flight invocation holds one reference. The owner (host
//! subscription or guest) holds the initial one. The destructor runs
//! exactly once, whenever the last reference is given up.

use tessel_hostapi::FunctionRef;

use crate::error::MarshalError;

/// How arguments are passed to the invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One extra argument, passed as a handle.
    Handle,
    /// Positional numeric arguments, passed as-is.
    Values,
}

/// Whether the closure environment is moved out during a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// `a` is zeroed for the duration of the call and restored afterwards.
    Mut,
    /// `a` stays visible to nested calls.
    Shared,
}

/// Closure kind, encoded on the wire as a two-bit tag:
/// bit 0 set for [`Shape::Values`], bit 1 set for [`Mutability::Mut`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureKind {
    pub shape: Shape,
    pub mutability: Mutability,
}

impl ClosureKind {
    pub const fn new(shape: Shape, mutability: Mutability) -> Self {
        Self { shape, mutability }
    }

    pub fn from_tag(tag: i32) -> Result<Self, MarshalError> {
        if tag & !0b11 != 0 {
            return Err(MarshalError::BadClosureKind(tag));
        }
        let shape = if tag & 0b01 != 0 { Shape::Values } else { Shape::Handle };
        let mutability = if tag & 0b10 != 0 {
            Mutability::Mut
        } else {
            Mutability::Shared
        };
        Ok(Self { shape, mutability })
    }

    pub fn tag(self) -> i32 {
        let shape = match self.shape {
            Shape::Handle => 0,
            Shape::Values => 0b01,
        };
        let mutability = match self.mutability {
            Mutability::Shared => 0,
            Mutability::Mut => 0b10,
        };
        shape | mutability
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureState {
    pub a: u32,
    pub b: u32,
    pub ref_count: u32,
    pub dtor: u32,
    pub invoker: u32,
    pub kind: ClosureKind,
}

/// One call in progress. Carries the words to pass to the invoker.
#[must_use = "every invocation must be ended with `end_invoke`"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub function: FunctionRef,
    pub a: u32,
    pub b: u32,
    pub invoker: u32,
    pub kind: ClosureKind,
}

/// The destructor call owed to the guest once a closure is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    pub a: u32,
    pub b: u32,
    pub dtor: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// That was the last reference.
    Destroyed(Teardown),
    /// Other references (in-flight calls or shares) remain.
    Retained,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    state: Option<ClosureState>,
}

/// Generational slot map of live closures.
#[derive(Debug, Default)]
pub struct ClosureTable {
    entries: Vec<Entry>,
    free: Vec<u32>,
}

impl ClosureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, a: u32, b: u32, dtor: u32, invoker: u32, kind: ClosureKind) -> FunctionRef {
        let state = ClosureState {
            a,
            b,
            ref_count: 1,
            dtor,
            invoker,
            kind,
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    state: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[index as usize];
        entry.state = Some(state);
        FunctionRef {
            index,
            generation: entry.generation,
        }
    }

    pub fn get(&self, function: FunctionRef) -> Option<&ClosureState> {
        self.entries
            .get(function.index as usize)
            .filter(|entry| entry.generation == function.generation)
            .and_then(|entry| entry.state.as_ref())
    }

    fn state_mut(&mut self, function: FunctionRef) -> Result<&mut ClosureState, MarshalError> {
        self.entries
            .get_mut(function.index as usize)
            .filter(|entry| entry.generation == function.generation)
            .and_then(|entry| entry.state.as_mut())
            .ok_or(MarshalError::ClosureDestroyed)
    }

    fn remove(&mut self, function: FunctionRef) -> Option<ClosureState> {
        let entry = self.entries.get_mut(function.index as usize)?;
        let state = entry.state.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(function.index);
        Some(state)
    }

    /// Start a call. Takes a reference; a `Mut` closure hands its `a` to
    /// this call and leaves zero behind until [`end_invoke`](Self::end_invoke).
    pub fn begin_invoke(&mut self, function: FunctionRef) -> Result<Invocation, MarshalError> {
        let state = self.state_mut(function)?;
        state.ref_count += 1;
        let a = state.a;
        if state.kind.mutability == Mutability::Mut {
            state.a = 0;
        }
        Ok(Invocation {
            function,
            a,
            b: state.b,
            invoker: state.invoker,
            kind: state.kind,
        })
    }

    /// Finish a call. Returns the teardown if this dropped the last
    /// reference, otherwise puts a `Mut` closure's `a` back.
    pub fn end_invoke(&mut self, invocation: Invocation) -> Result<Option<Teardown>, MarshalError> {
        let state = self.state_mut(invocation.function)?;
        state.ref_count -= 1;
        if state.ref_count > 0 {
            if state.kind.mutability == Mutability::Mut {
                state.a = invocation.a;
            }
            return Ok(None);
        }
        let b = state.b;
        let dtor = state.dtor;
        self.remove(invocation.function);
        Ok(Some(Teardown {
            a: invocation.a,
            b,
            dtor,
        }))
    }

    /// Give up one owning reference.
    pub fn release(&mut self, function: FunctionRef) -> Result<Released, MarshalError> {
        let state = self.state_mut(function)?;
        if state.ref_count > 1 {
            state.ref_count -= 1;
            return Ok(Released::Retained);
        }
        let teardown = Teardown {
            a: state.a,
            b: state.b,
            dtor: state.dtor,
        };
        self.remove(function);
        tracing::debug!(index = function.index, "closure destroyed");
        Ok(Released::Destroyed(teardown))
    }

    /// Take an extra owning reference.
    pub fn retain(&mut self, function: FunctionRef) -> Result<(), MarshalError> {
        self.state_mut(function)?.ref_count += 1;
        Ok(())
    }

    /// Number of live closures.
    pub fn live(&self) -> usize {
        self.entries.iter().filter(|entry| entry.state.is_some()).count()
    }
}
