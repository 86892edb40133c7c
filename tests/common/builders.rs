//! Test data builders for stores and pipelines

use std::sync::Arc;
use tileworks::pipeline::{PipelineBuilder, SourceStage};
use tileworks::stats::InMemoryStats;
use tileworks::storage::{AllocationKind, AppendStore, Element, StoreOptions};

/// Builder for append stores with small slabs, so tests cross slab
/// boundaries without appending millions of values.
pub struct StoreBuilder {
    kind: AllocationKind,
    slab_size_bytes: usize,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            kind: AllocationKind::Heap,
            slab_size_bytes: 64,
        }
    }

    pub fn native(mut self) -> Self {
        self.kind = AllocationKind::Native;
        self
    }

    pub fn kind(mut self, kind: AllocationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn slab_size(mut self, bytes: usize) -> Self {
        self.slab_size_bytes = bytes;
        self
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            allocation_kind: self.kind,
            slab_size_bytes: self.slab_size_bytes,
        }
    }

    pub fn build<E: Element>(self) -> AppendStore<E> {
        AppendStore::new(self.options()).unwrap()
    }

    /// Build a store and append every value of `values`.
    pub fn filled<E: Element>(self, values: impl IntoIterator<Item = E>) -> AppendStore<E> {
        let mut store = self.build();
        for value in values {
            store.append(value).unwrap();
        }
        store
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A pipeline reading `0..count`, reporting into a fresh [`InMemoryStats`].
pub fn numbers_pipeline(name: &str, count: u64) -> (SourceStage<u64>, Arc<InMemoryStats>) {
    let stats = InMemoryStats::new();
    let source = PipelineBuilder::new(name, stats.clone()).read_from("generate", 0..count);
    (source, stats)
}
