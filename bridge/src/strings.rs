//! UTF-8 string and buffer codec between host values and guest memory.
//!
//! Decoding is strict: invalid UTF-8 is a marshalling error, never replaced
//! with substitution characters.
//!
//! Encoding asks the guest allocator for space. Without a guest `realloc`
//! the text is written in one pass into an allocation of its exact byte
//! length. With `realloc`, the common mostly-ASCII case is optimised: the
//! initial allocation is one byte per UTF-16 unit, the ASCII prefix is
//! copied as-is, and only on the first non-ASCII character is the buffer
//! grown to fit the prefix plus three bytes per remaining UTF-16 unit.

use crate::error::MarshalError;
use crate::memory::{checked_range, GuestMemory, MemoryViews};

/// An `(offset, length)` pair into guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestSlice {
    pub ptr: u32,
    pub len: u32,
}

impl GuestSlice {
    /// Offset 0 with length 0 is reserved for "no value".
    pub const ABSENT: Self = Self { ptr: 0, len: 0 };

    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }
}

/// Decode `len` bytes at `ptr` as UTF-8.
pub fn decode(
    views: &mut MemoryViews,
    data: &[u8],
    ptr: u32,
    len: u32,
) -> Result<String, MarshalError> {
    let bytes = views.view::<u8>(data).bytes(ptr, len)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| MarshalError::InvalidUtf8 { ptr, len })
}

/// Decode an optional string; `(0, 0)` is absent.
pub fn decode_optional(
    views: &mut MemoryViews,
    data: &[u8],
    ptr: u32,
    len: u32,
) -> Result<Option<String>, MarshalError> {
    if (GuestSlice { ptr, len }).is_absent() {
        return Ok(None);
    }
    decode(views, data, ptr, len).map(Some)
}

/// Copy `len` bytes at `ptr` out of guest memory.
pub fn read_bytes(
    views: &mut MemoryViews,
    data: &[u8],
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, MarshalError> {
    views.view::<u8>(data).bytes(ptr, len).map(<[u8]>::to_vec)
}

/// Copy `count` f32 elements at `ptr` out of guest memory.
pub fn read_f32s(
    views: &mut MemoryViews,
    data: &[u8],
    ptr: u32,
    count: u32,
) -> Result<Vec<f32>, MarshalError> {
    views.view::<f32>(data).load_slice(ptr, count)
}

/// Write an optional slice into a 12-byte out record:
/// `{ tag: i32 @0, ptr: i32 @4, len: i32 @8 }`.
pub fn store_slice_record(
    views: &mut MemoryViews,
    data: &mut [u8],
    out: u32,
    slice: Option<GuestSlice>,
) -> Result<(), MarshalError> {
    let slice_or_absent = slice.unwrap_or(GuestSlice::ABSENT);
    let mut ints = views.view_mut::<i32>(data);
    ints.store(out, slice.is_some() as i32)?;
    ints.store(out + 4, slice_or_absent.ptr as i32)?;
    ints.store(out + 8, slice_or_absent.len as i32)?;
    Ok(())
}

fn to_u32(len: usize) -> Result<u32, MarshalError> {
    u32::try_from(len).map_err(|_| MarshalError::AllocationFailed)
}

/// Encode `text` into freshly allocated guest memory.
pub fn encode<M: GuestMemory + ?Sized>(mem: &mut M, text: &str) -> anyhow::Result<GuestSlice> {
    if mem.has_realloc() {
        encode_ascii_first(mem, text)
    } else {
        encode_exact(mem, text.as_bytes())
    }
}

/// Encode an optional string; `None` becomes [`GuestSlice::ABSENT`].
pub fn encode_optional<M: GuestMemory + ?Sized>(
    mem: &mut M,
    text: Option<&str>,
) -> anyhow::Result<GuestSlice> {
    match text {
        Some(text) => encode(mem, text),
        None => Ok(GuestSlice::ABSENT),
    }
}

/// Copy a byte buffer into freshly allocated guest memory.
pub fn encode_bytes<M: GuestMemory + ?Sized>(mem: &mut M, bytes: &[u8]) -> anyhow::Result<GuestSlice> {
    encode_exact(mem, bytes)
}

fn encode_exact<M: GuestMemory + ?Sized>(mem: &mut M, bytes: &[u8]) -> anyhow::Result<GuestSlice> {
    let len = to_u32(bytes.len())?;
    let ptr = mem.malloc(len)?;
    let (data, views) = mem.parts();
    checked_range(data.len(), ptr, len)?;
    views.view_mut::<u8>(data).store_slice(ptr, bytes)?;
    Ok(GuestSlice { ptr, len })
}

fn encode_ascii_first<M: GuestMemory + ?Sized>(mem: &mut M, text: &str) -> anyhow::Result<GuestSlice> {
    let mut capacity = to_u32(text.encode_utf16().count())?;
    let mut ptr = mem.malloc(capacity)?;

    let ascii_len = text.bytes().position(|b| b > 0x7F).unwrap_or(text.len());
    {
        let (data, views) = mem.parts();
        checked_range(data.len(), ptr, capacity)?;
        views
            .view_mut::<u8>(data)
            .store_slice(ptr, &text.as_bytes()[..ascii_len])?;
    }

    let mut written = ascii_len;
    if ascii_len != text.len() {
        let rest = &text[ascii_len..];
        let new_capacity = to_u32(ascii_len + rest.encode_utf16().count() * 3)?;
        ptr = mem.realloc(ptr, capacity, new_capacity)?;
        capacity = new_capacity;

        // The allocator may hand back anything; a bad pointer must not wrap.
        let suffix = ptr
            .checked_add(to_u32(ascii_len)?)
            .ok_or(MarshalError::AllocationFailed)?;
        let (data, views) = mem.parts();
        checked_range(data.len(), ptr, capacity)?;
        views.view_mut::<u8>(data).store_slice(suffix, rest.as_bytes())?;
        written += rest.len();
    }

    debug_assert!(written <= capacity as usize);
    Ok(GuestSlice {
        ptr,
        len: to_u32(written)?,
    })
}
