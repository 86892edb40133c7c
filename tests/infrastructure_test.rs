//! Test to verify test infrastructure works correctly

mod common;

use common::builders::StoreBuilder;
use common::collectors::Collected;
use tileworks::storage::{AllocationKind, LongStore};

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let store: LongStore = StoreBuilder::new()
        .kind(AllocationKind::Native)
        .slab_size(32)
        .filled([7, 8, 9]);

    assert_eq!(store.size(), 3);
    assert_eq!(store.slab_size_bytes(), 32);
    assert_eq!(store.allocation_kind(), AllocationKind::Native);
}

#[test]
fn test_store_builder_crosses_slabs() {
    let store = StoreBuilder::new().slab_size(16).filled(0..5u32);
    assert_eq!(store.size(), 5);
    assert_eq!(store.slab_count(), 2);
    assert_eq!(store.allocation_kind(), AllocationKind::Heap);
}

#[test]
fn test_collector() {
    let collected = Collected::new();
    let consume = collected.consumer();
    consume(3).unwrap();
    consume(1).unwrap();
    consume(3).unwrap();

    assert_eq!(collected.items(), vec![3, 1, 3]);
    assert_eq!(collected.sorted(), vec![1, 3, 3]);
    assert_eq!(collected.counts()[&3], 2);
}

#[test]
fn test_within_timeout_returns_value() {
    assert_eq!(common::within_timeout(|| 40 + 2), 42);
}
