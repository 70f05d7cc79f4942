//! Typed, bounds-checked views over the guest's linear memory.
//!
//! Every access validates pointer and length arguments against the current
//! memory size; out-of-bounds access is a [`MarshalError::OutOfBounds`].
//!
//! [`MemoryViews`] caches one view per element type, keyed on the identity
//! (base address and length) of the buffer it was built over. Guest memory
//! growth may move or resize the buffer, so the identity is re-checked on
//! every access and a stale view is rebuilt before use. There is no
//! explicit invalidation call.

use std::marker::PhantomData;
use std::ops::Range;

use crate::error::MarshalError;

/// Size of a WebAssembly page.
pub const WASM_PAGE_SIZE: usize = 65536;

/// Validate that `[ptr, ptr+len)` lies within `size` bytes and return it
/// as a range.
pub fn checked_range(size: usize, ptr: u32, len: u32) -> Result<Range<usize>, MarshalError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= size)
        .ok_or(MarshalError::OutOfBounds { ptr, len, size })?;
    Ok(start..end)
}

/// Validate that a pointer range `[ptr, ptr+len)` is within memory bounds.
pub fn validate_range(size: usize, ptr: u32, len: u32) -> Result<(), MarshalError> {
    checked_range(size, ptr, len).map(|_| ())
}

/// Which cached view an element type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    U8 = 0,
    I32 = 1,
    F32 = 2,
    F64 = 3,
}

/// A fixed-width little-endian element readable from linear memory.
pub trait Element: Copy {
    const WIDTH: usize;
    const KIND: ViewKind;

    fn decode(bytes: &[u8]) -> Self;
    fn encode(self, out: &mut [u8]);
}

macro_rules! le_element {
    ($ty:ty, $kind:expr) => {
        impl Element for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const KIND: ViewKind = $kind;

            fn decode(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$ty>::from_le_bytes(raw)
            }

            fn encode(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

le_element!(u8, ViewKind::U8);
le_element!(i32, ViewKind::I32);
le_element!(f32, ViewKind::F32);
le_element!(f64, ViewKind::F64);

/// Identity of a backing buffer: where it lives and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIdentity {
    base: usize,
    len: usize,
}

impl BufferIdentity {
    pub fn of(data: &[u8]) -> Self {
        Self {
            base: data.as_ptr() as usize,
            len: data.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedView {
    identity: BufferIdentity,
    elements: usize,
}

/// Per-instance cache of typed views.
#[derive(Debug, Default)]
pub struct MemoryViews {
    cached: [Option<CachedView>; 4],
    rebuilds: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the element count of the cached view for `T`, rebuilding it
    /// if `data` is not the buffer it was built over.
    fn refresh<T: Element>(&mut self, data: &[u8]) -> usize {
        let identity = BufferIdentity::of(data);
        let slot = &mut self.cached[T::KIND as usize];
        if let Some(view) = *slot {
            if view.identity == identity {
                return view.elements;
            }
            tracing::trace!(kind = ?T::KIND, len = data.len(), "memory view rebuilt after growth");
        }
        let elements = data.len() / T::WIDTH;
        *slot = Some(CachedView { identity, elements });
        self.rebuilds += 1;
        elements
    }

    /// Read-only typed view over the current buffer.
    pub fn view<'a, T: Element>(&mut self, data: &'a [u8]) -> View<'a, T> {
        let elements = self.refresh::<T>(data);
        View {
            data,
            elements,
            _marker: PhantomData,
        }
    }

    /// Writable typed view over the current buffer.
    pub fn view_mut<'a, T: Element>(&mut self, data: &'a mut [u8]) -> ViewMut<'a, T> {
        let elements = self.refresh::<T>(data);
        ViewMut {
            data,
            elements,
            _marker: PhantomData,
        }
    }

    /// How many times any view has been (re)built.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Read-only typed window; offsets are in bytes.
pub struct View<'a, T> {
    data: &'a [u8],
    elements: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> View<'a, T> {
    /// Number of whole elements in the view.
    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Read one element at byte offset `ptr`.
    pub fn load(&self, ptr: u32) -> Result<T, MarshalError> {
        let range = checked_range(self.elements * T::WIDTH, ptr, T::WIDTH as u32)?;
        Ok(T::decode(&self.data[range]))
    }

    /// Copy `count` elements starting at byte offset `ptr`.
    pub fn load_slice(&self, ptr: u32, count: u32) -> Result<Vec<T>, MarshalError> {
        let byte_len = (count as usize)
            .checked_mul(T::WIDTH)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(MarshalError::OutOfBounds {
                ptr,
                len: count,
                size: self.data.len(),
            })?;
        let range = checked_range(self.elements * T::WIDTH, ptr, byte_len)?;
        Ok(self.data[range].chunks_exact(T::WIDTH).map(T::decode).collect())
    }
}

impl<'a> View<'a, u8> {
    /// Borrow `[ptr, ptr+len)` without copying.
    pub fn bytes(&self, ptr: u32, len: u32) -> Result<&'a [u8], MarshalError> {
        let range = checked_range(self.elements, ptr, len)?;
        Ok(&self.data[range])
    }
}

/// Writable typed window; offsets are in bytes.
pub struct ViewMut<'a, T> {
    data: &'a mut [u8],
    elements: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> ViewMut<'a, T> {
    pub fn len(&self) -> usize {
        self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    pub fn load(&self, ptr: u32) -> Result<T, MarshalError> {
        let range = checked_range(self.elements * T::WIDTH, ptr, T::WIDTH as u32)?;
        Ok(T::decode(&self.data[range]))
    }

    /// Write one element at byte offset `ptr`.
    pub fn store(&mut self, ptr: u32, value: T) -> Result<(), MarshalError> {
        let range = checked_range(self.elements * T::WIDTH, ptr, T::WIDTH as u32)?;
        value.encode(&mut self.data[range]);
        Ok(())
    }

    /// Write `values` contiguously starting at byte offset `ptr`.
    pub fn store_slice(&mut self, ptr: u32, values: &[T]) -> Result<(), MarshalError> {
        let byte_len = values.len() * T::WIDTH;
        let range = checked_range(
            self.elements * T::WIDTH,
            ptr,
            u32::try_from(byte_len).map_err(|_| MarshalError::OutOfBounds {
                ptr,
                len: u32::MAX,
                size: self.data.len(),
            })?,
        )?;
        for (chunk, value) in self.data[range].chunks_exact_mut(T::WIDTH).zip(values) {
            value.encode(chunk);
        }
        Ok(())
    }
}

/// Guest linear memory plus the guest's allocator.
///
/// Implemented over a Wasmtime store for real guests and over a plain
/// vector in tests. `malloc`/`realloc` may grow (and so move) the memory;
/// callers must re-fetch `parts()` after every allocation.
pub trait GuestMemory {
    /// The current memory buffer and the view cache.
    fn parts(&mut self) -> (&mut [u8], &mut MemoryViews);

    /// Allocate `size` bytes in the guest.
    fn malloc(&mut self, size: u32) -> anyhow::Result<u32>;

    /// Whether the guest exports a reallocation function.
    fn has_realloc(&self) -> bool;

    /// Resize an allocation made by `malloc`.
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32) -> anyhow::Result<u32>;
}
