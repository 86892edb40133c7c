//! Growable append-only storage for fixed-width primitives.
//!
//! Stages that must accumulate more data than fits comfortably in one
//! allocation (node coordinate indexes, id sort buffers, ...) write into an
//! [`AppendStore`]. The store grows one fixed-size slab at a time, so it never
//! needs a single huge contiguous allocation and never copies existing data.
//!
//! ```ignore
//! use tileworks::storage::{LongStore, StoreOptions};
//!
//! let mut nodes = LongStore::new(StoreOptions::native(1 << 20))?;
//! nodes.append(encoded_lat_lon)?;
//! let reader = nodes.reader();
//! std::thread::spawn(move || reader.get(0));
//! ```

pub mod append;
pub mod memory;
mod slab;

pub use append::{AppendStore, Element, IntStore, LongStore, StoreOptions, StoreReader};
pub use memory::MemoryEstimate;
pub use slab::AllocationKind;

/// Default slab size (1 MiB)
pub const DEFAULT_SLAB_SIZE_BYTES: usize = 1 << 20;
