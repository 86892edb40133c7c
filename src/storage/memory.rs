//! Rough memory accounting used to keep buffering decisions inside a budget.

/// Size of a pointer held by a container that references a slab.
pub const POINTER_BYTES: u64 = 8;

/// Bookkeeping kept per slab: allocation header plus directory entry.
pub const SLAB_HEADER_BYTES: u64 = 16;

/// Estimated resident size of one slab of `slab_size` bytes, including the
/// pointer that references it.
pub const fn estimate_slab_size(slab_size: u64) -> u64 {
    slab_size + SLAB_HEADER_BYTES + POINTER_BYTES
}

/// Anything that can report an estimate of the memory it holds.
pub trait MemoryEstimate {
    fn estimate_memory_usage_bytes(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_slab_size() {
        assert_eq!(estimate_slab_size(1024), 1024 + 24);
    }
}
