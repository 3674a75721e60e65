//! This crate implements a dynamic memory allocator with boundary tags and
//! segregated free lists, managing a single heap that grows on demand.
//!
//!  - **Allocation, deallocation, and in-place resizing with constant
//!    per-block overhead.** Each block spends 8 bytes on its header and
//!    footer. Free blocks store their list links in the payload area.
//!
//!  - **Immediate coalescing in constant time.** Boundary tags make both
//!    neighbors of a block reachable without an adjacency index, so a freed
//!    block is merged with its free neighbors right away.
//!
//!  - **Segregated fit.** Free blocks are filed into 16 buckets by
//!    `floor(log2(size))`, so a search only touches blocks of roughly the
//!    right magnitude.
//!
//!  - **The memory comes from a [`HeapSource`].** It only has to append
//!    contiguous memory to the end of the heap, like `sbrk`. [`ArenaSource`]
//!    hands out a caller-supplied memory block; `MmapSource` reserves address
//!    space on Unix.
//!
//!  - **This crate supports `#![no_std]`.**
//!
//! The heap never shrinks. Memory is not returned to the source until the
//! source itself is dropped.
//!
//! # Examples
//!
//! ## `SegFit`: Core API
//!
//! ```rust
//! use segfit::{ArenaSource, SegFit};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//!
//! let mut heap = SegFit::new(ArenaSource::new(&mut pool));
//! heap.initialize().unwrap();
//!
//! unsafe {
//!     let mut ptr1 = heap.allocate(8).unwrap().cast::<u64>();
//!     let mut ptr2 = heap.allocate(8).unwrap().cast::<u64>();
//!     *ptr1.as_mut() = 42;
//!     *ptr2.as_mut() = 56;
//!     assert_eq!(*ptr1.as_ref(), 42);
//!     assert_eq!(*ptr2.as_ref(), 56);
//!
//!     let ptr1 = heap.resize(Some(ptr1.cast()), 800).unwrap().cast::<u64>();
//!     assert_eq!(*ptr1.as_ref(), 42);
//!
//!     heap.free(ptr1.cast());
//!     heap.free(ptr2.cast());
//! }
//!
//! heap.check().unwrap();
//! ```
//!
//! ## `GlobalSegFit`: Global Allocator
//!
//! ```rust
//! # #[cfg(unix)] {
//! use std::alloc::{GlobalAlloc, Layout};
//!
//! static A: segfit::GlobalSegFit = segfit::GlobalSegFit::new();
//!
//! unsafe {
//!     let layout = Layout::from_size_align(100, 8).unwrap();
//!     let ptr = A.alloc(layout);
//!     assert!(!ptr.is_null());
//!     A.dealloc(ptr, layout);
//! }
//! # }
//! ```
//!
//! # Details
//!
//! ## Heap Layout
//!
//! The heap starts with a padding word, a permanently allocated prologue
//! block whose payload holds the bucket heads, and ends with a zero-sized
//! allocated epilogue header. These sentinels spare the neighbor lookups
//! any special cases at the ends of the heap.
//!
//! ## Fit Policy
//!
//! Each bucket is sorted by non-increasing size. The search starts at the
//! bucket the request maps to and returns the first block large enough,
//! which is the largest block of the first bucket that has any. This is
//! first-fit over the buckets, not best-fit.
//!
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod error;
mod segfit;
mod source;
pub use self::{
    error::{Error, HeapError},
    segfit::{bucket_of, Block, Blocks, FreeBlocks, SegFit},
    source::{ArenaSource, HeapSource},
};

/// The alignment of every payload returned by the allocator.
pub const ALIGNMENT: usize = 8;

/// The minimum size of a block: a header, a footer, and room for two free
/// list links.
pub const MIN_BLOCK_SIZE: usize = 16;

/// The minimum number of bytes the heap grows by at once.
pub const CHUNK_SIZE: usize = 1 << 12;

/// The number of free-list buckets.
pub const NUM_CLASSES: usize = 16;

/// The maximum size of the heap. Blocks are addressed by 32-bit offsets.
pub const MAX_HEAP_SIZE: usize = u32::MAX as usize & !(ALIGNMENT - 1);

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod global;

        #[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
        pub use self::{global::GlobalSegFit, source::MmapSource};
    }
}

#[cfg(test)]
extern crate std;
