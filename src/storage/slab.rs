//! Fixed-size memory blocks and the lock-free directory that indexes them.
//!
//! A slab is allocated zeroed, never resized, and only ever accessed through
//! atomic cells, so the writer and any number of readers may touch the same
//! slab at once without locks.
//!
//! The directory maps a dense slab index to its slab. It is split into
//! buckets of doubling length (1, 2, 4, ...) so it can grow without ever
//! moving an entry that a reader might be looking at.

use crate::error::{Result, TileworksError};
use serde::{Deserialize, Serialize};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Alignment used for native slabs large enough to fill a page.
const PAGE_SIZE: usize = 4096;

/// Size of one heap slab word.
const WORD_BYTES: usize = 8;

/// Where slab memory comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// Word-aligned buffers owned by the global allocator like any `Vec`.
    #[default]
    Heap,
    /// Page-aligned blocks requested with an explicit layout and handed back
    /// to the allocator as soon as the slab is dropped.
    Native,
}

impl AllocationKind {
    /// Display name for logs and summaries
    pub fn name(&self) -> &'static str {
        match self {
            AllocationKind::Heap => "heap",
            AllocationKind::Native => "native",
        }
    }
}

/// Layout of a native slab of `size` bytes.
pub(crate) fn native_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, size.min(PAGE_SIZE)).ok()
}

/// One fixed-length, zero-initialized block of memory.
pub(crate) struct Slab {
    ptr: NonNull<u8>,
    len: usize,
    kind: AllocationKind,
}

// SAFETY: a slab exclusively owns its allocation and its contents are only
// read or written through atomic cells (see `Slab::cell`).
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// Allocate a zeroed slab. `len` must be a power of two and a multiple of 8.
    pub(crate) fn allocate(len: usize, kind: AllocationKind) -> Result<Self> {
        debug_assert!(len.is_power_of_two() && len % WORD_BYTES == 0);

        let ptr = match kind {
            AllocationKind::Heap => {
                let words = len / WORD_BYTES;
                let mut buf: Vec<u64> = Vec::new();
                buf.try_reserve_exact(words)
                    .map_err(|_| TileworksError::Allocation { bytes: len })?;
                buf.resize(words, 0);
                let raw = Box::into_raw(buf.into_boxed_slice()) as *mut u64;
                // Box never hands out null.
                NonNull::new(raw as *mut u8).ok_or(TileworksError::Allocation { bytes: len })?
            }
            AllocationKind::Native => {
                let layout =
                    native_layout(len).ok_or(TileworksError::Allocation { bytes: len })?;
                // SAFETY: layout has a non-zero size.
                let raw = unsafe { alloc::alloc_zeroed(layout) };
                NonNull::new(raw).ok_or(TileworksError::Allocation { bytes: len })?
            }
        };

        Ok(Self { ptr, len, kind })
    }

    /// Atomic cell of type `C` starting at byte `offset`.
    ///
    /// `offset` must be a multiple of `size_of::<C>()` and the cell must lie
    /// entirely within the slab.
    #[inline]
    pub(crate) fn cell<C>(&self, offset: usize) -> &C {
        debug_assert!(offset + std::mem::size_of::<C>() <= self.len);
        debug_assert_eq!(offset % std::mem::align_of::<C>(), 0);
        // SAFETY: the slab is at least 8-byte aligned, zero-initialized and
        // lives as long as `self`. `C` is an atomic integer type whose
        // all-zeroes bit pattern is valid, and every access goes through it.
        unsafe { &*(self.ptr.as_ptr().add(offset) as *const C) }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        match self.kind {
            AllocationKind::Heap => {
                let words = self.len() / WORD_BYTES;
                // SAFETY: ptr came from `Box<[u64]>::into_raw` with `words` elements.
                unsafe {
                    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                        self.ptr.as_ptr() as *mut u64,
                        words,
                    )));
                }
            }
            AllocationKind::Native => {
                if let Some(layout) = native_layout(self.len) {
                    // SAFETY: ptr was returned by `alloc_zeroed` with this layout.
                    unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
                }
            }
        }
    }
}

const BUCKETS: usize = usize::BITS as usize;

/// Append-only, lock-free index from slab number to slab.
///
/// Only one thread (the store writer) may call [`SlabDirectory::push`].
pub(crate) struct SlabDirectory {
    buckets: [OnceLock<Box<[OnceLock<Slab>]>>; BUCKETS],
    len: AtomicUsize,
}

impl SlabDirectory {
    pub(crate) fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| OnceLock::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Bucket and position within the bucket of slab `index`.
    #[inline]
    fn locate(index: usize) -> (usize, usize) {
        let n = index + 1;
        let bucket = (usize::BITS - 1 - n.leading_zeros()) as usize;
        (bucket, n - (1 << bucket))
    }

    /// Number of slabs pushed so far.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&Slab> {
        let (bucket, pos) = Self::locate(index);
        self.buckets[bucket].get()?.get(pos)?.get()
    }

    /// Append `slab` at index `len()`.
    pub(crate) fn push(&self, slab: Slab) -> usize {
        let index = self.len.load(Ordering::Relaxed);
        let (bucket, pos) = Self::locate(index);
        let entries =
            self.buckets[bucket].get_or_init(|| (0..1usize << bucket).map(|_| OnceLock::new()).collect());
        if entries[pos].set(slab).is_err() {
            unreachable!("slab {index} pushed twice");
        }
        self.len.store(index + 1, Ordering::Release);
        index
    }
}
