//! Handle table — maps small integer handles to host-owned values.
//!
//! The guest never sees a host value directly, only the index of the slot
//! holding it. Slots are either occupied or a link in the free list, so
//! issuing and releasing handles is O(1) and released slots are reused
//! before the table grows.
//!
//! Handles 0–3 are the shared constants undefined, null, true and false.
//! Everything below [`RESERVED_HANDLES`] is immortal: releasing it is a
//! no-op, so a guest bug cannot evict a shared constant.

use tessel_hostapi::HostValue;

use crate::error::MarshalError;

/// Index of a slot in the handle table.
pub type Handle = u32;

pub const UNDEFINED: Handle = 0;
pub const NULL: Handle = 1;
pub const TRUE: Handle = 2;
pub const FALSE: Handle = 3;

/// Handles below this value are never recycled (constants plus padding).
pub const RESERVED_HANDLES: u32 = 36;

/// Value returned for reads of a released slot.
static TOMBSTONE: HostValue = HostValue::Undefined;

#[derive(Debug)]
enum Slot {
    Occupied(HostValue),
    /// Free-list link to the next free slot (or one past the end).
    Free(u32),
}

/// Growable slot array with an intrusive free list.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Slot>,
    /// Always a free slot or `slots.len()`.
    next_free: u32,
    max_handles: u32,
}

impl HandleTable {
    /// Create a table holding only the reserved slots.
    pub fn new(max_handles: u32) -> Self {
        let mut slots = Vec::with_capacity(RESERVED_HANDLES as usize * 2);
        slots.push(Slot::Occupied(HostValue::Undefined));
        slots.push(Slot::Occupied(HostValue::Null));
        slots.push(Slot::Occupied(HostValue::Bool(true)));
        slots.push(Slot::Occupied(HostValue::Bool(false)));
        while slots.len() < RESERVED_HANDLES as usize {
            slots.push(Slot::Occupied(HostValue::Undefined));
        }
        Self {
            slots,
            next_free: RESERVED_HANDLES,
            max_handles: max_handles.max(RESERVED_HANDLES),
        }
    }

    /// Store a value and return its handle.
    ///
    /// Reuses the most recently released slot if there is one, otherwise
    /// appends. Fails only when the table would exceed its slot limit.
    pub fn add(&mut self, value: HostValue) -> Result<Handle, MarshalError> {
        if self.next_free as usize == self.slots.len() {
            if self.slots.len() as u32 >= self.max_handles {
                return Err(MarshalError::HandleOverflow(self.max_handles));
            }
            self.slots.push(Slot::Free(self.next_free + 1));
        }
        let idx = self.next_free;
        let slot = &mut self.slots[idx as usize];
        let Slot::Free(next) = *slot else {
            return Err(MarshalError::InvalidHandle(idx));
        };
        *slot = Slot::Occupied(value);
        self.next_free = next;
        Ok(idx)
    }

    /// Borrow the value behind a handle.
    ///
    /// A released slot reads as undefined. A handle past the end of the
    /// table is a marshalling error.
    pub fn get(&self, handle: Handle) -> Result<&HostValue, MarshalError> {
        match self.slots.get(handle as usize) {
            Some(Slot::Occupied(value)) => Ok(value),
            Some(Slot::Free(_)) => {
                tracing::warn!(handle, "read of released handle");
                Ok(&TOMBSTONE)
            }
            None => Err(MarshalError::InvalidHandle(handle)),
        }
    }

    /// Remove the value behind a handle and release the slot.
    ///
    /// Reserved handles are returned by clone and stay in place.
    pub fn take(&mut self, handle: Handle) -> Result<HostValue, MarshalError> {
        if handle < RESERVED_HANDLES {
            return self.get(handle).cloned();
        }
        let next_free = self.next_free;
        match self.slots.get_mut(handle as usize) {
            None => Err(MarshalError::InvalidHandle(handle)),
            Some(Slot::Free(_)) => {
                tracing::warn!(handle, "take of released handle");
                Ok(HostValue::Undefined)
            }
            Some(slot) => {
                let prev = std::mem::replace(slot, Slot::Free(next_free));
                self.next_free = handle;
                match prev {
                    Slot::Occupied(value) => Ok(value),
                    Slot::Free(_) => Ok(HostValue::Undefined),
                }
            }
        }
    }

    /// Drop the table's reference to a value.
    ///
    /// No-op for reserved handles and for slots that are already free.
    pub fn release(&mut self, handle: Handle) {
        if let Err(err) = self.take(handle) {
            tracing::warn!(handle, %err, "release of unknown handle");
        }
    }

    /// Issue a second handle to the same value.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, MarshalError> {
        let value = self.get(handle)?.clone();
        self.add(value)
    }

    /// Number of live, non-reserved handles.
    pub fn live(&self) -> usize {
        self.slots[RESERVED_HANDLES as usize..]
            .iter()
            .filter(|slot| matches!(slot, Slot::Occupied(_)))
            .count()
    }

    /// Total slots, including reserved and free ones.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use tessel_hostapi::HostObject;

    #[derive(Debug)]
    struct Texture;

    impl HostObject for Texture {
        fn type_name(&self) -> &str {
            "Texture"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_reserved_constants() {
        let table = HandleTable::default();
        assert_eq!(table.get(UNDEFINED).unwrap(), &HostValue::Undefined);
        assert_eq!(table.get(NULL).unwrap(), &HostValue::Null);
        assert_eq!(table.get(TRUE).unwrap(), &HostValue::Bool(true));
        assert_eq!(table.get(FALSE).unwrap(), &HostValue::Bool(false));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_add_get_release_round_trip() {
        let mut table = HandleTable::default();
        let values = [
            HostValue::from("text"),
            HostValue::Number(-0.5),
            HostValue::Bytes(vec![1, 2, 3]),
            HostValue::error("Error", "boom"),
        ];
        for value in values {
            let handle = table.add(value.clone()).unwrap();
            assert!(handle >= RESERVED_HANDLES);
            assert_eq!(table.get(handle).unwrap(), &value);
            table.release(handle);
        }
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_reserved_handles_are_immortal() {
        let mut table = HandleTable::default();
        for _ in 0..3 {
            for handle in [UNDEFINED, NULL, TRUE, FALSE, RESERVED_HANDLES - 1] {
                table.release(handle);
            }
        }
        assert_eq!(table.get(NULL).unwrap(), &HostValue::Null);
        assert_eq!(table.get(TRUE).unwrap(), &HostValue::Bool(true));
        assert_eq!(table.get(FALSE).unwrap(), &HostValue::Bool(false));
        // Nothing was pushed onto the free list.
        assert_eq!(table.add(HostValue::Null).unwrap(), RESERVED_HANDLES);
    }

    #[test]
    fn test_free_list_reuses_released_slot() {
        let mut table = HandleTable::default();
        let first = table.add(HostValue::from("x")).unwrap();
        table.release(first);
        let second = table.add(HostValue::from("y")).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.get(second).unwrap(), &HostValue::from("y"));
    }

    #[test]
    fn test_release_then_add_scenario() {
        let mut table = HandleTable::default();
        let a = table.add(HostValue::from("a")).unwrap();
        let n = table.add(HostValue::Number(42.0)).unwrap();
        let obj = table.add(HostValue::object(Texture)).unwrap();
        assert_eq!((a, n, obj), (36, 37, 38));

        table.release(37);
        let reused = table.add(HostValue::Bool(true)).unwrap();
        assert_eq!(reused, 37);
        assert_eq!(table.get(37).unwrap(), &HostValue::Bool(true));
        assert_eq!(table.get(36).unwrap(), &HostValue::from("a"));
        assert_eq!(table.get(38).unwrap().type_name(), "Texture");
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut table = HandleTable::default();
        let handles: Vec<Handle> = (0..4)
            .map(|i| table.add(HostValue::Number(i as f64)).unwrap())
            .collect();
        table.release(handles[1]);
        table.release(handles[3]);
        assert_eq!(table.add(HostValue::Null).unwrap(), handles[3]);
        assert_eq!(table.add(HostValue::Null).unwrap(), handles[1]);
        assert_eq!(table.add(HostValue::Null).unwrap(), handles[3] + 1);
    }

    #[test]
    fn test_released_handle_reads_as_undefined() {
        let mut table = HandleTable::default();
        let handle = table.add(HostValue::from("gone")).unwrap();
        table.release(handle);
        assert_eq!(table.get(handle).unwrap(), &HostValue::Undefined);
    }

    #[test]
    fn test_double_release_does_not_corrupt_free_list() {
        let mut table = HandleTable::default();
        let a = table.add(HostValue::Number(1.0)).unwrap();
        let b = table.add(HostValue::Number(2.0)).unwrap();
        table.release(a);
        table.release(a);
        assert_eq!(table.add(HostValue::Null).unwrap(), a);
        assert_eq!(table.add(HostValue::Null).unwrap(), b + 1);
    }

    #[test]
    fn test_take_releases() {
        let mut table = HandleTable::default();
        let handle = table.add(HostValue::from("once")).unwrap();
        assert_eq!(table.take(handle).unwrap(), HostValue::from("once"));
        assert_eq!(table.live(), 0);
        assert_eq!(table.take(NULL).unwrap(), HostValue::Null);
        assert_eq!(table.get(NULL).unwrap(), &HostValue::Null);
    }

    #[test]
    fn test_out_of_range_handle() {
        let mut table = HandleTable::default();
        assert_eq!(table.get(500), Err(MarshalError::InvalidHandle(500)));
        assert_eq!(table.take(500), Err(MarshalError::InvalidHandle(500)));
        table.release(500);
        assert_eq!(table.add(HostValue::Null).unwrap(), RESERVED_HANDLES);
    }

    #[test]
    fn test_clone_ref_shares_value() {
        let mut table = HandleTable::default();
        let original = table.add(HostValue::object(Texture)).unwrap();
        let copy = table.clone_ref(original).unwrap();
        assert_ne!(original, copy);
        assert_eq!(table.get(original).unwrap(), table.get(copy).unwrap());
        table.release(original);
        assert_eq!(table.get(copy).unwrap().type_name(), "Texture");
    }

    #[test]
    fn test_overflow() {
        let mut table = HandleTable::new(RESERVED_HANDLES + 2);
        table.add(HostValue::Null).unwrap();
        table.add(HostValue::Null).unwrap();
        assert_eq!(
            table.add(HostValue::Null),
            Err(MarshalError::HandleOverflow(RESERVED_HANDLES + 2))
        );
    }
}
