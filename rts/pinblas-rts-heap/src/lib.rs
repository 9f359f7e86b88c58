//! Managed array heap for the pinblas runtime.
//!
//! This crate models the part of a garbage-collected runtime that native
//! numeric code has to cooperate with:
//!
//! - **Handles, not addresses** - arrays are named by [`ArrayId`]; their
//!   storage may move whenever the heap collects.
//! - **Relocating collection** - [`ManagedHeap::collect`] moves every
//!   unpinned array to fresh storage. Freed arrays are released by
//!   [`ManagedHeap::free`] itself, not by the collector.
//! - **Critical pins** - [`ManagedHeap::pin`] hands out a [`PinnedArray`]
//!   guard exposing a stable raw pointer until it is dropped.
//! - **Critical-region rules** - while a thread holds a critical pin it
//!   may not allocate on the heap, and no collection may run anywhere.
//!   Both are refused with an error rather than waited on.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------+        +---------------------------+
//! |      Handle table        |        |     Critical state        |
//! |  ArrayId -> ArraySlot    |        |  heap-wide pin count      |
//! |  (RwLock, brief holds)   |        |  per-thread pin depth     |
//! +------------+-------------+        +-------------+-------------+
//!              |                                    |
//!              v                                    v
//! +--------------------------+        +---------------------------+
//! |  ArraySlot               |<-------|  PinnedArray guard        |
//! |  storage (relocatable)   |  pin   |  raw base pointer         |
//! |  pin count, claim state  |        |  release on Drop          |
//! +--------------------------+        +---------------------------+
//! ```
//!
//! The handle table lock is only held for map lookups, inserts and removals.
//! The collector snapshots the table and then claims each slot in turn, the
//! same way a caller closure does, so relocation never holds the table lock.
//! Taking a pin never allocates and never waits for a collection: a slot
//! being relocated refuses the pin with [`HeapError::Relocating`].

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod pin;

pub use pin::{critical_depth, PinnedArray};

use parking_lot::{Mutex, RwLock};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Size in bytes of one array element.
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f64>();

/// Errors reported by the managed heap.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    /// The handle does not name a live array.
    #[error("unknown array {0}")]
    UnknownArray(ArrayId),

    /// The array is pinned and cannot be accessed or freed.
    #[error("array {id} is pinned ({pins} active pins)")]
    ArrayPinned {
        /// The pinned array.
        id: ArrayId,
        /// Number of pins currently held.
        pins: usize,
    },

    /// The array is being accessed by a caller closure.
    #[error("array {0} is busy")]
    ArrayBusy(ArrayId),

    /// A collection is moving the array right now. Retrying succeeds once
    /// the collector has moved on.
    #[error("array {0} is being relocated")]
    Relocating(ArrayId),

    /// The current thread holds a critical pin and tried to allocate.
    #[error("allocation of {requested} bytes inside a critical region (depth {depth})")]
    AllocationInCriticalRegion {
        /// Bytes requested.
        requested: usize,
        /// Critical pins held by the current thread.
        depth: usize,
    },

    /// A collection was requested while pins are outstanding.
    #[error("collection refused: {pinned} critical pins outstanding")]
    CollectionBlocked {
        /// Critical pins outstanding across all threads.
        pinned: usize,
    },

    /// The requested length cannot be represented.
    #[error("invalid array length {0}")]
    InvalidLength(usize),

    /// The heap ceiling would be exceeded.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available under the ceiling.
        available: usize,
    },
}

/// Result type for heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

/// Opaque handle naming an array on a [`ManagedHeap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ArrayId(u64);

impl ArrayId {
    /// Rebuild a handle from its raw value (as passed across the C ABI).
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration for the managed heap.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Ceiling on live array bytes.
    pub max_bytes: usize,
    /// Enforce the critical-region rules (no allocation while the current
    /// thread holds a pin).
    pub strict_critical: bool,
    /// Bytes allocated since the last collection after which `alloc`
    /// attempts a collection. Zero disables automatic collection.
    pub collect_threshold_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,             // 256 MB
            strict_critical: true,
            collect_threshold_bytes: 8 * 1024 * 1024, // 8 MB
        }
    }
}

/// Snapshot of heap statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Arrays allocated.
    pub allocations: u64,
    /// Arrays freed.
    pub frees: u64,
    /// Completed collections.
    pub collections: u64,
    /// Collections refused because pins were outstanding.
    pub refused_collections: u64,
    /// Array relocations performed by collections.
    pub relocations: u64,
    /// Critical pins taken.
    pub pins: u64,
    /// Critical pins released.
    pub unpins: u64,
    /// Critical pins currently held.
    pub active_pins: u64,
    /// Arrays currently live.
    pub live_arrays: u64,
    /// Bytes currently live.
    pub live_bytes: u64,
    /// Highest live byte count observed.
    pub peak_bytes: u64,
    /// Total time spent collecting (microseconds).
    pub total_collect_time_us: u64,
}

/// Outcome of a completed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReport {
    /// Arrays moved to fresh storage.
    pub relocated: usize,
    /// Arrays left in place (permanent, empty, pinned or busy).
    pub retained: usize,
    /// Time the collection took.
    pub duration: Duration,
}

/// Slot is unclaimed.
const UNCLAIMED: u8 = 0;
/// A caller closure has exclusive access.
const ACCESSING: u8 = 1;
/// The collector is moving the storage.
const RELOCATING: u8 = 2;

/// Storage and pin state for one array.
pub(crate) struct ArraySlot {
    data: UnsafeCell<Box<[f64]>>,
    /// Mirrors the storage address; republished by every relocation.
    base: AtomicPtr<f64>,
    len: usize,
    pub(crate) pins: AtomicUsize,
    state: AtomicU8,
    permanent: bool,
}

// Safety: the storage is only touched by (a) a caller closure or the
// collector after claiming `state`, or (b) native code through a critical
// pin. A claim and a pin exclude each other through the `state`/`pins` pair,
// and two claims exclude each other through the compare-exchange on `state`.
unsafe impl Sync for ArraySlot {}
unsafe impl Send for ArraySlot {}

impl ArraySlot {
    fn new(mut data: Box<[f64]>, permanent: bool) -> Self {
        Self {
            base: AtomicPtr::new(data.as_mut_ptr()),
            len: data.len(),
            data: UnsafeCell::new(data),
            pins: AtomicUsize::new(0),
            state: AtomicU8::new(UNCLAIMED),
            permanent,
        }
    }

    fn base_ptr(&self) -> *mut f64 {
        self.base.load(Ordering::Acquire)
    }

    /// Claim the slot for a caller closure (`ACCESSING`) or the collector
    /// (`RELOCATING`). Pairs with the pin-side check in `ManagedHeap::pin`;
    /// both sides use `SeqCst` so that at most one wins.
    fn claim(&self, id: ArrayId, claim: u8) -> HeapResult<()> {
        if let Err(current) =
            self.state
                .compare_exchange(UNCLAIMED, claim, Ordering::SeqCst, Ordering::SeqCst)
        {
            return Err(Self::conflict(id, current));
        }
        let pins = self.pins.load(Ordering::SeqCst);
        if pins > 0 {
            self.state.store(UNCLAIMED, Ordering::SeqCst);
            return Err(HeapError::ArrayPinned { id, pins });
        }
        Ok(())
    }

    fn release(&self) {
        self.state.store(UNCLAIMED, Ordering::SeqCst);
    }

    fn conflict(id: ArrayId, state: u8) -> HeapError {
        if state == RELOCATING {
            HeapError::Relocating(id)
        } else {
            HeapError::ArrayBusy(id)
        }
    }

    /// Move the storage to a fresh allocation.
    ///
    /// # Safety
    ///
    /// The caller must hold a `RELOCATING` claim on this slot.
    unsafe fn relocate(&self) {
        // Safety: the claim excludes caller closures and pins, and no other
        // collector can hold the same claim.
        let storage = unsafe { &mut *self.data.get() };
        // The new box is allocated before the old one is released, so the
        // address always changes.
        let mut moved: Box<[f64]> = storage.to_vec().into_boxed_slice();
        self.base.store(moved.as_mut_ptr(), Ordering::Release);
        *storage = moved;
    }
}

/// Releases a claim even if the caller closure unwinds.
struct AccessGuard<'a>(&'a ArraySlot);

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocations: u64,
    frees: u64,
    collections: u64,
    refused_collections: u64,
    relocations: u64,
    live_bytes: u64,
    peak_bytes: u64,
    total_collect_time_us: u64,
}

/// A heap of relocatable `f64` arrays.
///
/// All methods take `&self`; the heap is `Sync` and may be shared across
/// threads.
pub struct ManagedHeap {
    config: HeapConfig,
    arrays: RwLock<HashMap<ArrayId, Arc<ArraySlot>>>,
    next_id: AtomicU64,
    /// Critical pins outstanding across all threads.
    critical: AtomicUsize,
    pins_taken: AtomicU64,
    pins_released: AtomicU64,
    bytes_since_collect: AtomicUsize,
    counters: Mutex<Counters>,
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHeap")
            .field("config", &self.config)
            .field("live_arrays", &self.arrays.read().len())
            .field("critical", &self.critical.load(Ordering::Relaxed))
            .finish()
    }
}

impl ManagedHeap {
    /// Create a heap with the given configuration.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            arrays: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            critical: AtomicUsize::new(0),
            pins_taken: AtomicU64::new(0),
            pins_released: AtomicU64::new(0),
            bytes_since_collect: AtomicUsize::new(0),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Create a heap with the default configuration.
    #[must_use]
    pub fn with_default_config() -> Self {
        Self::new(HeapConfig::default())
    }

    /// The heap configuration.
    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocate a zero-filled array of `len` elements.
    ///
    /// # Errors
    ///
    /// Fails inside a critical region, when the length overflows, or when
    /// the heap ceiling would be exceeded.
    pub fn alloc_zeroed(&self, len: usize) -> HeapResult<ArrayId> {
        self.insert(vec![0.0; self.checked_len(len)?].into_boxed_slice(), false)
    }

    /// Allocate an array holding a copy of `data`.
    ///
    /// # Errors
    ///
    /// As for [`ManagedHeap::alloc_zeroed`].
    pub fn alloc_from(&self, data: &[f64]) -> HeapResult<ArrayId> {
        self.checked_len(data.len())?;
        self.insert(data.into(), false)
    }

    /// Allocate an array that collections never move.
    ///
    /// Permanently pinned arrays still go through [`ManagedHeap::pin`] for
    /// native access; they only differ in surviving collections in place.
    ///
    /// # Errors
    ///
    /// As for [`ManagedHeap::alloc_zeroed`].
    pub fn alloc_pinned(&self, data: &[f64]) -> HeapResult<ArrayId> {
        self.checked_len(data.len())?;
        self.insert(data.into(), true)
    }

    fn checked_len(&self, len: usize) -> HeapResult<usize> {
        let bytes = len
            .checked_mul(ELEMENT_BYTES)
            .ok_or(HeapError::InvalidLength(len))?;
        let depth = critical_depth();
        if self.config.strict_critical && depth > 0 {
            warn!(requested = bytes, depth, "allocation attempted inside critical region");
            return Err(HeapError::AllocationInCriticalRegion {
                requested: bytes,
                depth,
            });
        }
        if bytes > self.config.max_bytes {
            let live = self.counters.lock().live_bytes as usize;
            return Err(HeapError::OutOfMemory {
                requested: bytes,
                available: self.config.max_bytes.saturating_sub(live),
            });
        }
        Ok(len)
    }

    fn insert(&self, data: Box<[f64]>, permanent: bool) -> HeapResult<ArrayId> {
        let bytes = data.len() * ELEMENT_BYTES;
        {
            let mut counters = self.counters.lock();
            let available = self.config.max_bytes.saturating_sub(counters.live_bytes as usize);
            if bytes > available {
                return Err(HeapError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
            counters.allocations += 1;
            counters.live_bytes += bytes as u64;
            counters.peak_bytes = counters.peak_bytes.max(counters.live_bytes);
        }

        let id = ArrayId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.arrays
            .write()
            .insert(id, Arc::new(ArraySlot::new(data, permanent)));
        trace!(%id, len = bytes / ELEMENT_BYTES, permanent, "allocated array");

        let threshold = self.config.collect_threshold_bytes;
        let since = self.bytes_since_collect.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if threshold > 0 && since >= threshold {
            match self.collect() {
                Ok(report) => debug!(relocated = report.relocated, "automatic collection"),
                Err(err) => debug!(error = %err, "automatic collection skipped"),
            }
        }
        Ok(id)
    }

    /// Free an array.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown, pinned, or busy.
    pub fn free(&self, id: ArrayId) -> HeapResult<()> {
        let mut arrays = self.arrays.write();
        let slot = arrays.get(&id).ok_or(HeapError::UnknownArray(id))?;
        let pins = slot.pins.load(Ordering::SeqCst);
        if pins > 0 {
            return Err(HeapError::ArrayPinned { id, pins });
        }
        // A slot mid-relocation may still be freed: the collector holds its
        // own reference until it is done.
        if slot.state.load(Ordering::SeqCst) == ACCESSING {
            return Err(HeapError::ArrayBusy(id));
        }
        let bytes = slot.len * ELEMENT_BYTES;
        arrays.remove(&id);
        drop(arrays);

        let mut counters = self.counters.lock();
        counters.frees += 1;
        counters.live_bytes -= bytes as u64;
        Ok(())
    }

    /// Whether `id` names a live array.
    #[must_use]
    pub fn contains(&self, id: ArrayId) -> bool {
        self.arrays.read().contains_key(&id)
    }

    /// Number of elements in an array.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown.
    pub fn len(&self, id: ArrayId) -> HeapResult<usize> {
        self.slot(id).map(|slot| slot.len)
    }

    /// Whether an array has no elements.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown.
    pub fn is_empty(&self, id: ArrayId) -> HeapResult<bool> {
        self.len(id).map(|len| len == 0)
    }

    /// Current address of an array's storage.
    ///
    /// Only meaningful for comparisons; the value is stale as soon as a
    /// collection moves the array.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown.
    pub fn address(&self, id: ArrayId) -> HeapResult<usize> {
        self.slot(id).map(|slot| slot.base_ptr() as usize)
    }

    /// Whether any critical pin is held on this array.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown.
    pub fn is_pinned(&self, id: ArrayId) -> HeapResult<bool> {
        self.slot(id)
            .map(|slot| slot.pins.load(Ordering::SeqCst) > 0)
    }

    /// Critical pins outstanding across all threads.
    #[must_use]
    pub fn critical_pins(&self) -> usize {
        self.critical.load(Ordering::SeqCst)
    }

    fn slot(&self, id: ArrayId) -> HeapResult<Arc<ArraySlot>> {
        self.arrays
            .read()
            .get(&id)
            .cloned()
            .ok_or(HeapError::UnknownArray(id))
    }

    /// Look up and claim a slot for a caller closure. The claim is taken
    /// under the table lock so that `free` sees it.
    fn claim_access(&self, id: ArrayId) -> HeapResult<Arc<ArraySlot>> {
        let arrays = self.arrays.read();
        let slot = arrays.get(&id).ok_or(HeapError::UnknownArray(id))?;
        slot.claim(id, ACCESSING)?;
        Ok(Arc::clone(slot))
    }

    /// Run `f` with shared access to an array's contents.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown, pinned, already being accessed, or
    /// being relocated.
    pub fn read<R>(&self, id: ArrayId, f: impl FnOnce(&[f64]) -> R) -> HeapResult<R> {
        let slot = self.claim_access(id)?;
        let _guard = AccessGuard(&slot);
        // Safety: the claim excludes pins, other accessors, and relocation
        // of this slot.
        let data = unsafe { &*slot.data.get() };
        Ok(f(data))
    }

    /// Run `f` with exclusive access to an array's contents.
    ///
    /// # Errors
    ///
    /// As for [`ManagedHeap::read`].
    pub fn write<R>(&self, id: ArrayId, f: impl FnOnce(&mut [f64]) -> R) -> HeapResult<R> {
        let slot = self.claim_access(id)?;
        let _guard = AccessGuard(&slot);
        // Safety: as for `read`; the claim makes this access unique.
        let data = unsafe { &mut *slot.data.get() };
        Ok(f(data))
    }

    /// Copy an array's contents out.
    ///
    /// # Errors
    ///
    /// As for [`ManagedHeap::read`].
    pub fn to_vec(&self, id: ArrayId) -> HeapResult<Vec<f64>> {
        self.read(id, <[f64]>::to_vec)
    }

    /// Pin an array for native access.
    ///
    /// The returned guard exposes the array's base pointer, which stays
    /// valid and unmoved until the guard is dropped. While any guard is
    /// alive on the current thread, that thread must not allocate on the
    /// heap or block waiting on another thread that might.
    ///
    /// Pinning never waits for a collection. If the collector is moving
    /// this array at that moment the pin fails with
    /// [`HeapError::Relocating`] and may be retried.
    ///
    /// # Errors
    ///
    /// Fails if the array is unknown, currently accessed by a caller
    /// closure, or being relocated.
    pub fn pin(&self, id: ArrayId) -> HeapResult<PinnedArray<'_>> {
        let arrays = self.arrays.read();
        let slot = arrays.get(&id).ok_or(HeapError::UnknownArray(id))?;

        slot.pins.fetch_add(1, Ordering::SeqCst);
        let state = slot.state.load(Ordering::SeqCst);
        if state != UNCLAIMED {
            slot.pins.fetch_sub(1, Ordering::SeqCst);
            return Err(ArraySlot::conflict(id, state));
        }
        self.critical.fetch_add(1, Ordering::SeqCst);
        self.pins_taken.fetch_add(1, Ordering::Relaxed);

        // The pin count now keeps any collector off this slot, so the
        // address cannot change until the guard is dropped.
        let (base, len) = (slot.base_ptr(), slot.len);
        let slot = Arc::clone(slot);
        drop(arrays);
        Ok(PinnedArray::new(self, id, slot, base, len))
    }

    /// Called by [`PinnedArray`] on drop.
    pub(crate) fn unpin(&self, slot: &ArraySlot) {
        slot.pins.fetch_sub(1, Ordering::SeqCst);
        self.critical.fetch_sub(1, Ordering::SeqCst);
        self.pins_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Collect the heap, relocating every movable array.
    ///
    /// Each array is claimed, moved and released on its own; the handle
    /// table lock is only held to snapshot the live arrays. Arrays that are
    /// pinned or accessed while the collection runs are left in place.
    ///
    /// # Errors
    ///
    /// Refused with [`HeapError::CollectionBlocked`] while any critical pin
    /// is outstanding when the collection starts.
    pub fn collect(&self) -> HeapResult<CollectionReport> {
        let start = Instant::now();

        let pinned = self.critical.load(Ordering::SeqCst);
        if pinned > 0 {
            self.counters.lock().refused_collections += 1;
            warn!(pinned, "collection refused while critical pins are held");
            return Err(HeapError::CollectionBlocked { pinned });
        }

        let live: Vec<(ArrayId, Arc<ArraySlot>)> = self
            .arrays
            .read()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut relocated = 0;
        let mut retained = 0;
        for (id, slot) in &live {
            if slot.permanent || slot.len == 0 || slot.claim(*id, RELOCATING).is_err() {
                retained += 1;
                continue;
            }
            let _guard = AccessGuard(slot);
            // Safety: the relocation claim is held until `_guard` drops.
            unsafe { slot.relocate() };
            relocated += 1;
        }
        drop(live);
        self.bytes_since_collect.store(0, Ordering::Relaxed);

        let duration = start.elapsed();
        {
            let mut counters = self.counters.lock();
            counters.collections += 1;
            counters.relocations += relocated as u64;
            counters.total_collect_time_us += duration.as_micros() as u64;
        }
        debug!(relocated, retained, ?duration, "collection complete");

        Ok(CollectionReport {
            relocated,
            retained,
            duration,
        })
    }

    /// Snapshot the heap statistics.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let live_arrays = self.arrays.read().len() as u64;
        let counters = self.counters.lock();
        HeapStats {
            allocations: counters.allocations,
            frees: counters.frees,
            collections: counters.collections,
            refused_collections: counters.refused_collections,
            relocations: counters.relocations,
            pins: self.pins_taken.load(Ordering::Relaxed),
            unpins: self.pins_released.load(Ordering::Relaxed),
            active_pins: self.critical.load(Ordering::SeqCst) as u64,
            live_arrays,
            live_bytes: counters.live_bytes,
            peak_bytes: counters.peak_bytes,
            total_collect_time_us: counters.total_collect_time_us,
        }
    }
}

impl Default for ManagedHeap {
    fn default() -> Self {
        Self::with_default_config()
    }
}
