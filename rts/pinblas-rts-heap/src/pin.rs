//! Critical pins.
//!
//! A [`PinnedArray`] is the heap's equivalent of a JNI critical section:
//! while it lives, the array's storage cannot move, the heap cannot
//! collect, and the owning thread cannot allocate on the heap. Dropping the
//! guard ends the critical section, including during unwinding.

use crate::{ArrayId, ArraySlot, ManagedHeap};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CRITICAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Number of critical pins held by the current thread.
#[must_use]
pub fn critical_depth() -> usize {
    CRITICAL_DEPTH.with(Cell::get)
}

/// A critical pin on one heap array.
///
/// The guard is `!Send`: it must be released on the thread that took it.
pub struct PinnedArray<'h> {
    heap: &'h ManagedHeap,
    slot: Arc<ArraySlot>,
    id: ArrayId,
    ptr: *mut f64,
    len: usize,
    _not_send: PhantomData<*const ()>,
}

impl<'h> PinnedArray<'h> {
    pub(crate) fn new(
        heap: &'h ManagedHeap,
        id: ArrayId,
        slot: Arc<ArraySlot>,
        ptr: *mut f64,
        len: usize,
    ) -> Self {
        CRITICAL_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            heap,
            slot,
            id,
            ptr,
            len,
            _not_send: PhantomData,
        }
    }

    /// The pinned array's handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Base pointer of the array, stable for the guard's lifetime.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const f64 {
        self.ptr
    }

    /// Mutable base pointer of the array.
    ///
    /// Several pointers may be derived from one pin; native code writing
    /// through them is responsible for its own aliasing rules.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&self) -> *mut f64 {
        self.ptr
    }

    /// Number of elements in the array.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array has no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The pinned address, for stability checks.
    #[inline]
    #[must_use]
    pub fn address(&self) -> usize {
        self.ptr as usize
    }
}

impl Drop for PinnedArray<'_> {
    fn drop(&mut self) {
        self.heap.unpin(&self.slot);
        CRITICAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl std::fmt::Debug for PinnedArray<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedArray")
            .field("id", &self.id)
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{HeapConfig, HeapError, ManagedHeap};

    use super::*;

    fn heap() -> ManagedHeap {
        ManagedHeap::new(HeapConfig {
            collect_threshold_bytes: 0,
            ..HeapConfig::default()
        })
    }

    #[test]
    fn test_pin_exposes_current_storage() {
        let heap = heap();
        let id = heap.alloc_from(&[1.0, 2.0, 3.0]).unwrap();

        let pin = heap.pin(id).unwrap();
        assert_eq!(pin.id(), id);
        assert_eq!(pin.len(), 3);
        assert_eq!(pin.address(), heap.address(id).unwrap());
        let second = unsafe { *pin.as_ptr().add(1) };
        assert_eq!(second, 2.0);
    }

    #[test]
    fn test_pin_tracks_critical_depth() {
        let heap = heap();
        let a = heap.alloc_zeroed(1).unwrap();
        let b = heap.alloc_zeroed(1).unwrap();
        assert_eq!(critical_depth(), 0);

        let pa = heap.pin(a).unwrap();
        let pb = heap.pin(b).unwrap();
        assert_eq!(critical_depth(), 2);
        assert_eq!(heap.critical_pins(), 2);

        drop(pb);
        drop(pa);
        assert_eq!(critical_depth(), 0);
        assert_eq!(heap.critical_pins(), 0);
    }

    #[test]
    fn test_pin_blocks_access_and_free() {
        let heap = heap();
        let id = heap.alloc_zeroed(2).unwrap();

        let pin = heap.pin(id).unwrap();
        assert!(heap.is_pinned(id).unwrap());
        assert_eq!(
            heap.write(id, |_| ()),
            Err(HeapError::ArrayPinned { id, pins: 1 })
        );
        assert_eq!(heap.free(id), Err(HeapError::ArrayPinned { id, pins: 1 }));

        drop(pin);
        assert!(!heap.is_pinned(id).unwrap());
        heap.write(id, |data| data[0] = 3.0).unwrap();
        heap.free(id).unwrap();
    }

    #[test]
    fn test_allocation_inside_critical_region_fails() {
        let heap = heap();
        let id = heap.alloc_zeroed(2).unwrap();

        let pin = heap.pin(id).unwrap();
        assert_eq!(
            heap.alloc_zeroed(4),
            Err(HeapError::AllocationInCriticalRegion {
                requested: 32,
                depth: 1
            })
        );
        drop(pin);

        assert!(heap.alloc_zeroed(4).is_ok());
    }

    #[test]
    fn test_relaxed_heap_allows_allocation_while_pinned() {
        let heap = ManagedHeap::new(HeapConfig {
            strict_critical: false,
            collect_threshold_bytes: 0,
            ..HeapConfig::default()
        });
        let id = heap.alloc_zeroed(2).unwrap();

        let _pin = heap.pin(id).unwrap();
        assert!(heap.alloc_zeroed(4).is_ok());
    }

    #[test]
    fn test_collection_refused_while_pinned() {
        let heap = heap();
        let id = heap.alloc_from(&[4.0, 5.0]).unwrap();

        let pin = heap.pin(id).unwrap();
        let address = pin.address();
        assert_eq!(heap.collect(), Err(HeapError::CollectionBlocked { pinned: 1 }));
        assert_eq!(heap.address(id).unwrap(), address);
        drop(pin);

        heap.collect().unwrap();
        assert_ne!(heap.address(id).unwrap(), address);
        assert_eq!(heap.stats().refused_collections, 1);
    }

    #[test]
    fn test_collection_from_other_thread_refused_while_pinned() {
        let heap = heap();
        let id = heap.alloc_zeroed(8).unwrap();

        let _pin = heap.pin(id).unwrap();
        std::thread::scope(|s| {
            let result = s.spawn(|| heap.collect()).join().unwrap();
            assert_eq!(result, Err(HeapError::CollectionBlocked { pinned: 1 }));
        });
    }

    #[test]
    fn test_pin_released_on_unwind() {
        let heap = heap();
        let id = heap.alloc_zeroed(2).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _pin = heap.pin(id).unwrap();
            panic!("native call failed");
        }));
        assert!(result.is_err());

        assert_eq!(critical_depth(), 0);
        assert!(!heap.is_pinned(id).unwrap());
        let stats = heap.stats();
        assert_eq!(stats.pins, 1);
        assert_eq!(stats.unpins, 1);
        assert_eq!(stats.active_pins, 0);
    }

    #[test]
    fn test_same_array_pinned_twice() {
        let heap = heap();
        let id = heap.alloc_zeroed(2).unwrap();

        let first = heap.pin(id).unwrap();
        let second = heap.pin(id).unwrap();
        assert_eq!(first.address(), second.address());
        drop(first);
        assert!(heap.is_pinned(id).unwrap());
        drop(second);
        assert!(!heap.is_pinned(id).unwrap());
    }
}
