//! The pin bracket around one kernel call.
//!
//! A [`PinSet`] collects the critical pins for every array argument of a
//! single gateway call. Arguments naming the same array share one pin.
//! Dropping the set releases every pin in reverse acquisition order, which
//! covers early returns, failed pins of later arguments, and unwinding out
//! of the kernel.
//!
//! ## Pinning Guarantee
//!
//! While the set is alive the pinned arrays cannot move and the heap cannot
//! collect. The set itself never allocates: it stores its pins inline.

use pinblas_rts_heap::{ArrayId, ManagedHeap, PinnedArray};

use crate::view::Operation;
use crate::{FfiError, FfiResult};

/// Most distinct arrays a single operation takes (gemv and gemm take three).
pub const MAX_PINNED_ARGUMENTS: usize = {
    let mut max = 0;
    let mut i = 0;
    while i < Operation::ALL.len() {
        if Operation::ALL[i].arity() > max {
            max = Operation::ALL[i].arity();
        }
        i += 1;
    }
    max
};

/// Critical pins for one gateway call.
#[derive(Debug)]
pub struct PinSet<'h> {
    heap: &'h ManagedHeap,
    pins: [Option<PinnedArray<'h>>; MAX_PINNED_ARGUMENTS],
    len: usize,
    shared: usize,
}

impl<'h> PinSet<'h> {
    /// An empty bracket on `heap`.
    #[must_use]
    pub fn new(heap: &'h ManagedHeap) -> Self {
        Self {
            heap,
            pins: std::array::from_fn(|_| None),
            len: 0,
            shared: 0,
        }
    }

    /// Pin `id` for the argument named `argument` and return the array's
    /// base pointer. An array already in the set is not pinned again.
    ///
    /// # Errors
    ///
    /// Returns [`FfiError::PinFailed`] if the heap refuses the pin. Pins
    /// taken earlier stay in the set and are released when it drops.
    pub fn pin(&mut self, argument: &'static str, id: ArrayId) -> FfiResult<*mut f64> {
        if let Some(pin) = self.find(id) {
            let ptr = pin.as_mut_ptr();
            self.shared += 1;
            return Ok(ptr);
        }
        if self.len == MAX_PINNED_ARGUMENTS {
            return Err(FfiError::TooManyArguments {
                max: MAX_PINNED_ARGUMENTS,
            });
        }
        let pin = self
            .heap
            .pin(id)
            .map_err(|source| FfiError::PinFailed { argument, source })?;
        let ptr = pin.as_mut_ptr();
        self.pins[self.len] = Some(pin);
        self.len += 1;
        Ok(ptr)
    }

    /// Pin `id` and return the pointer to element `offset`.
    ///
    /// The offset is not checked against the array length.
    ///
    /// # Errors
    ///
    /// As for [`PinSet::pin`].
    pub fn pin_at(
        &mut self,
        argument: &'static str,
        id: ArrayId,
        offset: usize,
    ) -> FfiResult<*mut f64> {
        self.pin(argument, id).map(|base| base.wrapping_add(offset))
    }

    fn find(&self, id: ArrayId) -> Option<&PinnedArray<'h>> {
        self.pins[..self.len]
            .iter()
            .flatten()
            .find(|pin| pin.id() == id)
    }

    /// Distinct arrays pinned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is pinned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arguments that reused a pin taken for an earlier argument.
    #[must_use]
    pub fn shared(&self) -> usize {
        self.shared
    }
}

impl Drop for PinSet<'_> {
    fn drop(&mut self) {
        for pin in self.pins[..self.len].iter_mut().rev() {
            drop(pin.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinblas_rts_heap::{critical_depth, HeapError};

    #[test]
    fn test_pin_set_dedupes_arrays() {
        let heap = ManagedHeap::with_default_config();
        let a = heap.alloc_zeroed(4).unwrap();

        let mut set = PinSet::new(&heap);
        let first = set.pin("x", a).unwrap();
        let second = set.pin("y", a).unwrap();

        assert_eq!(first, second);
        assert_eq!(set.len(), 1);
        assert_eq!(set.shared(), 1);
        assert_eq!(heap.critical_pins(), 1);
    }

    #[test]
    fn test_pin_at_applies_offset() {
        let heap = ManagedHeap::with_default_config();
        let a = heap.alloc_from(&[0.0, 9.0, 1.0]).unwrap();

        let mut set = PinSet::new(&heap);
        let ptr = set.pin_at("x", a, 2).unwrap();
        assert_eq!(unsafe { *ptr }, 1.0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let heap = ManagedHeap::with_default_config();
        let a = heap.alloc_zeroed(1).unwrap();
        let b = heap.alloc_zeroed(1).unwrap();
        let c = heap.alloc_zeroed(1).unwrap();

        {
            let mut set = PinSet::new(&heap);
            set.pin("a", a).unwrap();
            set.pin("b", b).unwrap();
            set.pin("c", c).unwrap();
            assert_eq!(critical_depth(), 3);
        }

        assert_eq!(critical_depth(), 0);
        assert_eq!(heap.critical_pins(), 0);
    }

    #[test]
    fn test_failed_pin_keeps_earlier_pins_until_drop() {
        let heap = ManagedHeap::with_default_config();
        let a = heap.alloc_zeroed(1).unwrap();
        let dead = heap.alloc_zeroed(1).unwrap();
        heap.free(dead).unwrap();

        let mut set = PinSet::new(&heap);
        set.pin("x", a).unwrap();
        let err = set.pin("y", dead).unwrap_err();
        assert_eq!(
            err,
            FfiError::PinFailed {
                argument: "y",
                source: HeapError::UnknownArray(dead)
            }
        );
        assert!(heap.is_pinned(a).unwrap());

        drop(set);
        assert!(!heap.is_pinned(a).unwrap());
    }

    #[test]
    fn test_capacity_exceeded() {
        let heap = ManagedHeap::with_default_config();
        let ids: Vec<_> = (0..4).map(|_| heap.alloc_zeroed(1).unwrap()).collect();

        let mut set = PinSet::new(&heap);
        for id in &ids[..3] {
            set.pin("arg", *id).unwrap();
        }
        assert_eq!(
            set.pin("arg", ids[3]).unwrap_err(),
            FfiError::TooManyArguments { max: 3 }
        );
    }
}
