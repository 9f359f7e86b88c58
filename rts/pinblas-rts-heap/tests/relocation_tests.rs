//! Relocation and pinning tests for the managed heap.
//!
//! These check the two guarantees native callers rely on:
//!
//! 1. Unpinned arrays really move when the heap collects, with contents intact
//! 2. Pinned arrays never move, and collection waits for no one

use pinblas_rts_heap::{critical_depth, HeapConfig, HeapError, ManagedHeap};
use proptest::prelude::*;

fn heap() -> ManagedHeap {
    ManagedHeap::new(HeapConfig {
        collect_threshold_bytes: 0,
        ..HeapConfig::default()
    })
}

// ============================================================================
// Relocation
// ============================================================================

#[test]
fn test_repeated_collections_preserve_contents() {
    let heap = heap();
    let ids: Vec<_> = (0..16)
        .map(|i| heap.alloc_from(&[i as f64; 32]).unwrap())
        .collect();

    for _ in 0..10 {
        heap.collect().unwrap();
    }

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(heap.to_vec(*id).unwrap(), vec![i as f64; 32]);
    }
    let stats = heap.stats();
    assert_eq!(stats.collections, 10);
    assert_eq!(stats.relocations, 160);
}

#[test]
fn test_freed_arrays_are_not_relocated() {
    let heap = heap();
    let keep = heap.alloc_zeroed(4).unwrap();
    let gone = heap.alloc_zeroed(4).unwrap();
    heap.free(gone).unwrap();

    let report = heap.collect().unwrap();

    assert_eq!(report.relocated, 1);
    assert!(heap.contains(keep));
    assert!(!heap.contains(gone));
}

// ============================================================================
// Pin stability under collection pressure
// ============================================================================

#[test]
fn test_pinned_address_stable_while_others_churn() {
    let heap = heap();
    let pinned = heap.alloc_from(&[1.0; 64]).unwrap();
    let churn: Vec<_> = (0..8).map(|_| heap.alloc_zeroed(64).unwrap()).collect();

    let pin = heap.pin(pinned).unwrap();
    let address = pin.address();
    for _ in 0..100 {
        assert!(matches!(
            heap.collect(),
            Err(HeapError::CollectionBlocked { .. })
        ));
        assert_eq!(pin.address(), address);
    }
    drop(pin);

    heap.collect().unwrap();
    for id in churn {
        heap.free(id).unwrap();
    }
    assert_eq!(heap.to_vec(pinned).unwrap(), vec![1.0; 64]);
    assert_eq!(critical_depth(), 0);
}

#[test]
fn test_permanent_array_survives_many_collections() {
    let heap = heap();
    let id = heap.alloc_pinned(&[2.5; 16]).unwrap();
    let address = heap.address(id).unwrap();

    for _ in 0..50 {
        heap.collect().unwrap();
    }

    assert_eq!(heap.address(id).unwrap(), address);
}

proptest! {
    #[test]
    fn collect_preserves_arbitrary_contents(data in prop::collection::vec(-1.0e6f64..1.0e6, 1..64)) {
        let heap = heap();
        let id = heap.alloc_from(&data).unwrap();
        let before = heap.address(id).unwrap();

        heap.collect().unwrap();

        prop_assert_ne!(heap.address(id).unwrap(), before);
        prop_assert_eq!(heap.to_vec(id).unwrap(), data);
    }

    #[test]
    fn pin_counts_balance(pins in 1usize..8) {
        let heap = heap();
        let id = heap.alloc_zeroed(4).unwrap();

        let guards: Vec<_> = (0..pins).map(|_| heap.pin(id).unwrap()).collect();
        prop_assert_eq!(critical_depth(), pins);
        prop_assert_eq!(heap.critical_pins(), pins);
        drop(guards);

        let stats = heap.stats();
        prop_assert_eq!(stats.pins, pins as u64);
        prop_assert_eq!(stats.unpins, pins as u64);
        prop_assert_eq!(critical_depth(), 0);
    }
}
