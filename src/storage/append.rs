//! Growable append-only arrays of fixed-width primitives.
//!
//! Values are written into lazily allocated slabs. A logical index maps to a
//! byte offset, and the byte offset maps to a slab with a shift and to a
//! position within that slab with a mask:
//!
//! ```text
//! byte_offset = index * WIDTH
//! slab        = byte_offset >> slab_bits
//! offset      = byte_offset & (slab_size - 1)
//! ```
//!
//! [`AppendStore`] is the single writer handle and cannot be cloned. Any
//! number of [`StoreReader`]s may read concurrently; a value becomes visible
//! to readers once the `append` that wrote it has returned.

use crate::error::{Result, TileworksError};
use crate::storage::memory::{estimate_slab_size, MemoryEstimate};
use crate::storage::slab::{native_layout, AllocationKind, Slab, SlabDirectory};
use crate::storage::DEFAULT_SLAB_SIZE_BYTES;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width primitive that can live in an append store.
pub trait Element: sealed::Sealed + Copy + Send + Sync + fmt::Debug + 'static {
    /// Width in bytes (4 or 8).
    const WIDTH: usize;
    /// log2 of `WIDTH`.
    const SHIFT: u32;

    #[doc(hidden)]
    type Cell: Sync;

    #[doc(hidden)]
    fn load(cell: &Self::Cell) -> Self;

    #[doc(hidden)]
    fn store(cell: &Self::Cell, value: Self);
}

macro_rules! impl_element {
    ($ty:ty, $cell:ty, $shift:expr) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const SHIFT: u32 = $shift;
            type Cell = $cell;

            #[inline]
            fn load(cell: &$cell) -> $ty {
                cell.load(Ordering::Relaxed)
            }

            #[inline]
            fn store(cell: &$cell, value: $ty) {
                cell.store(value, Ordering::Relaxed)
            }
        }
    };
}

impl_element!(u32, AtomicU32, 2);
impl_element!(i32, AtomicI32, 2);
impl_element!(u64, AtomicU64, 3);
impl_element!(i64, AtomicI64, 3);

/// Construction parameters for an [`AppendStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub allocation_kind: AllocationKind,
    pub slab_size_bytes: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            allocation_kind: AllocationKind::Heap,
            slab_size_bytes: DEFAULT_SLAB_SIZE_BYTES,
        }
    }
}

impl StoreOptions {
    pub fn heap(slab_size_bytes: usize) -> Self {
        Self {
            allocation_kind: AllocationKind::Heap,
            slab_size_bytes,
        }
    }

    pub fn native(slab_size_bytes: usize) -> Self {
        Self {
            allocation_kind: AllocationKind::Native,
            slab_size_bytes,
        }
    }

    /// Check the slab size and return log2 of it.
    pub fn validate(&self) -> Result<u32> {
        let size = self.slab_size_bytes;
        if !size.is_power_of_two() {
            return Err(TileworksError::Config(format!(
                "Slab size must be a power of 2: {}",
                size
            )));
        }
        if size % 8 != 0 {
            return Err(TileworksError::Config(format!(
                "Slab size must be a multiple of 8: {}",
                size
            )));
        }
        if native_layout(size).is_none() {
            return Err(TileworksError::Config(format!(
                "Slab size is too large to allocate: {}",
                size
            )));
        }
        Ok(size.trailing_zeros())
    }
}

/// State shared between the writer and its readers.
struct Shared<E> {
    slabs: SlabDirectory,
    /// Bytes published to readers.
    write_offset: AtomicU64,
    slab_size: usize,
    slab_bits: u32,
    slab_mask: u64,
    kind: AllocationKind,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Element> Shared<E> {
    #[inline]
    fn size(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire) >> E::SHIFT
    }

    #[inline]
    fn get(&self, index: u64) -> Result<E> {
        let published = self.write_offset.load(Ordering::Acquire);
        let byte_index = index
            .checked_mul(E::WIDTH as u64)
            .filter(|&byte_index| byte_index < published)
            .ok_or(TileworksError::OutOfBounds {
                index,
                size: published >> E::SHIFT,
            })?;

        let slab_idx = (byte_index >> self.slab_bits) as usize;
        let offset = (byte_index & self.slab_mask) as usize;
        let slab = self
            .slabs
            .get(slab_idx)
            .ok_or(TileworksError::OutOfBounds {
                index,
                size: published >> E::SHIFT,
            })?;
        Ok(E::load(slab.cell::<E::Cell>(offset)))
    }

    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.slabs.len() as u64 * estimate_slab_size(self.slab_size as u64)
    }
}

/// Writer handle of an append-only array of `E`.
///
/// Only this handle can append, so a store always has exactly one writer.
/// Use [`AppendStore::reader`] to hand read access to other threads.
pub struct AppendStore<E: Element> {
    shared: Arc<Shared<E>>,
    write_offset: u64,
}

/// 32-bit store, e.g. for tile ids.
pub type IntStore = AppendStore<u32>;

/// 64-bit store, e.g. for encoded coordinates and node ids.
pub type LongStore = AppendStore<u64>;

impl<E: Element> AppendStore<E> {
    /// Create an empty store. No memory is allocated until the first append.
    pub fn new(options: StoreOptions) -> Result<Self> {
        let slab_bits = options.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                slabs: SlabDirectory::new(),
                write_offset: AtomicU64::new(0),
                slab_size: options.slab_size_bytes,
                slab_bits,
                slab_mask: options.slab_size_bytes as u64 - 1,
                kind: options.allocation_kind,
                _marker: PhantomData,
            }),
            write_offset: 0,
        })
    }

    /// Append `value` at the end of the store, allocating a slab if needed.
    pub fn append(&mut self, value: E) -> Result<()> {
        let offset = self.write_offset;
        let slab_idx = (offset >> self.shared.slab_bits) as usize;

        while self.shared.slabs.len() <= slab_idx {
            let slab = Slab::allocate(self.shared.slab_size, self.shared.kind)?;
            let idx = self.shared.slabs.push(slab);
            tracing::debug!(
                "Allocated {} slab {} ({} bytes)",
                self.shared.kind.name(),
                idx,
                self.shared.slab_size
            );
        }

        let slab = self
            .shared
            .slabs
            .get(slab_idx)
            .ok_or(TileworksError::Allocation {
                bytes: self.shared.slab_size,
            })?;
        E::store(
            slab.cell::<E::Cell>((offset & self.shared.slab_mask) as usize),
            value,
        );

        self.write_offset = offset + E::WIDTH as u64;
        self.shared
            .write_offset
            .store(self.write_offset, Ordering::Release);
        Ok(())
    }

    /// Value at `index`, or [`TileworksError::OutOfBounds`] past the end.
    #[inline]
    pub fn get(&self, index: u64) -> Result<E> {
        self.shared.get(index)
    }

    /// Number of values appended so far.
    #[inline]
    pub fn size(&self) -> u64 {
        self.write_offset >> E::SHIFT
    }

    pub fn is_empty(&self) -> bool {
        self.write_offset == 0
    }

    pub fn element_width(&self) -> usize {
        E::WIDTH
    }

    pub fn slab_size_bytes(&self) -> usize {
        self.shared.slab_size
    }

    pub fn allocation_kind(&self) -> AllocationKind {
        self.shared.kind
    }

    /// Number of slabs allocated so far.
    pub fn slab_count(&self) -> usize {
        self.shared.slabs.len()
    }

    /// Estimated bytes held by this store's slabs and their bookkeeping.
    pub fn estimate_memory_usage_bytes(&self) -> u64 {
        self.shared.estimate_memory_usage_bytes()
    }

    /// A read-only handle that can be sent to other threads.
    pub fn reader(&self) -> StoreReader<E> {
        StoreReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Release the store. Slabs are freed now unless readers are still alive,
    /// in which case the last reader to drop frees them.
    pub fn close(self) {
        let readers = Arc::strong_count(&self.shared) - 1;
        tracing::debug!(
            "Closing {}-byte store: {} values in {} slabs, {} live readers",
            E::WIDTH,
            self.size(),
            self.slab_count(),
            readers
        );
    }

    /// Iterate over every value appended so far.
    pub fn iter(&self) -> impl Iterator<Item = E> + '_ {
        let shared = &self.shared;
        (0..self.size()).filter_map(move |i| shared.get(i).ok())
    }
}

impl<E: Element> MemoryEstimate for AppendStore<E> {
    fn estimate_memory_usage_bytes(&self) -> u64 {
        self.shared.estimate_memory_usage_bytes()
    }
}

impl<E: Element> fmt::Debug for AppendStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendStore")
            .field("width", &E::WIDTH)
            .field("size", &self.size())
            .field("slabs", &self.slab_count())
            .field("slab_size", &self.shared.slab_size)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

/// Read-only view of an [`AppendStore`], cheap to clone and share.
pub struct StoreReader<E: Element> {
    shared: Arc<Shared<E>>,
}

impl<E: Element> Clone for StoreReader<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Element> StoreReader<E> {
    #[inline]
    pub fn get(&self, index: u64) -> Result<E> {
        self.shared.get(index)
    }

    /// Number of values published by the writer so far.
    #[inline]
    pub fn size(&self) -> u64 {
        self.shared.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<E: Element> fmt::Debug for StoreReader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreReader")
            .field("width", &E::WIDTH)
            .field("size", &self.size())
            .finish()
    }
}
