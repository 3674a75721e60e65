//! The allocator core
use core::{fmt, ptr::NonNull};

use crate::{source::HeapSource, Error, ALIGNMENT, CHUNK_SIZE, MAX_HEAP_SIZE, MIN_BLOCK_SIZE};

mod check;
mod heap;
mod list;

pub use self::{
    check::{Blocks, FreeBlocks},
    heap::Block,
    list::bucket_of,
};
use self::heap::{pack, Heap, BOOTSTRAP_SIZE, DWORD, PROLOGUE, PROLOGUE_SIZE, WORD};

#[cfg_attr(doc, svgbobdoc::transform)]
/// A dynamic memory allocator managing one growable heap obtained from a
/// [`HeapSource`].
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///            prologue (size 72, allocated)                 epilogue
///   ,-----+-----+-----------------------+-----+-------   -------+-----,
///   | pad | hdr | bucket heads [0..16]  | ftr |  blocks ...     | 0/1 |
///   '-----+-----+----------+------------+-----+-------   -------+-----'
///   0     4     8          |            72    80                 len-4
///                          |
///                          |  bucket 6 (64..127 bytes)
///                          v
///            ,-----+------+------+----,    ,-----+------+------+----,
///            | hdr | next | prev | ftr|    | hdr | next | prev | ftr|
///            | 96  |  O---+------+----+--->| 64  |   0  |  O   | 64 |
///            '-----+------+------+----'    '-----+------+--|---+----'
///                     ^                                    |
///                     '------------------------------------'
/// ```
/// </center>
///
/// # Properties
///
/// Every block starts with a 4-byte header and ends with a 4-byte footer,
/// both holding the block's size and an allocation flag. Block sizes are
/// multiples of [`ALIGNMENT`] and at least [`MIN_BLOCK_SIZE`] bytes.
///
/// Free blocks are kept in [`NUM_CLASSES`](crate::NUM_CLASSES) buckets indexed
/// by `floor(log2(size))`. Each bucket is sorted by non-increasing size, and
/// equally-sized blocks are kept in insertion order.
///
/// Adjacent free blocks are always merged, so no two free blocks are ever
/// next to each other.
///
/// `SegFit` does not lock. Wrap it in a mutex (see `GlobalSegFit`) to share
/// it between threads.
pub struct SegFit<S> {
    source: S,
    heap: Option<Heap>,
}

// Safety: All memory reachable from `heap` is logically owned by this `SegFit`
//         and is only accessed through `&mut self`
unsafe impl<S: Send> Send for SegFit<S> {}

impl<S: fmt::Debug> fmt::Debug for SegFit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegFit")
            .field("source", &self.source)
            .field("heap", &self.heap)
            .finish()
    }
}

/// Compute the block size for a request of `size` payload bytes. Returns
/// `None` if it's not representable.
#[inline]
fn adjust_size(size: usize) -> Option<u32> {
    if size <= DWORD as usize {
        Some(MIN_BLOCK_SIZE as u32)
    } else {
        let size = size.checked_add(DWORD as usize + ALIGNMENT - 1)? & !(ALIGNMENT - 1);
        u32::try_from(size).ok().filter(|&x| x <= MAX_HEAP_SIZE as u32)
    }
}

impl<S> SegFit<S> {
    /// Construct an uninitialized allocator. Call [`Self::initialize`] before
    /// allocating.
    #[inline]
    pub const fn new(source: S) -> Self {
        Self { source, heap: None }
    }

    #[inline]
    pub const fn is_initialized(&self) -> bool {
        self.heap.is_some()
    }

    /// The current extent of the heap in bytes, including the bootstrap
    /// blocks and the epilogue.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.heap.map_or(0, |heap| heap.len as usize)
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the heap source.
    ///
    /// # Safety
    ///
    /// The caller must not grow the source behind the allocator's back.
    #[inline]
    pub unsafe fn source_mut_unchecked(&mut self) -> &mut S {
        &mut self.source
    }

    /// Get the number of bytes usable by the caller in a live allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self`.
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let heap = self.heap.unwrap_or_else(|| unreachable_uninit());
        heap.block(heap.offset_of(ptr)).payload_size()
    }
}

#[cold]
fn unreachable_uninit() -> ! {
    debug_assert!(false, "a pointer was passed to an uninitialized heap");
    // Safety: There can be no allocations before initialization
    unsafe { core::hint::unreachable_unchecked() }
}

impl<S: HeapSource> SegFit<S> {
    /// Create the initial heap: the padding word, the prologue holding the
    /// empty bucket heads, the epilogue, and a first free block of
    /// [`CHUNK_SIZE`] bytes.
    pub fn initialize(&mut self) -> Result<(), Error> {
        if self.heap.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        // Safety: We own `source`
        let base = unsafe { self.source.grow(BOOTSTRAP_SIZE as usize) }.ok_or(
            Error::Exhausted {
                requested: BOOTSTRAP_SIZE as usize,
            },
        )?;

        let addr = base.as_ptr() as usize;
        if addr % ALIGNMENT != 0 {
            return Err(Error::Misaligned {
                align: 1 << addr.trailing_zeros(),
            });
        }

        let mut heap = Heap {
            base,
            len: BOOTSTRAP_SIZE,
        };

        // Safety: All these words are inside `0..BOOTSTRAP_SIZE`
        unsafe {
            heap.set_word(0, 0);
            heap.write_tags(PROLOGUE, PROLOGUE_SIZE, true);
            for class in 0..crate::NUM_CLASSES {
                heap.set_word(PROLOGUE + class as u32 * WORD, 0);
            }
            heap.set_word(BOOTSTRAP_SIZE - WORD, pack(0, true));
        }
        log::trace!("bootstrapped heap at {:p}", base);

        self.heap = Some(heap);

        if self.extend(CHUNK_SIZE as u32 / WORD).is_none() {
            self.heap = None;
            return Err(Error::Exhausted {
                requested: CHUNK_SIZE,
            });
        }

        Ok(())
    }

    /// Grow the heap by `words` words (rounded up to an even number) and
    /// turn the new memory into a free block, merging it with a free block
    /// that ended at the old epilogue. Returns the resulting free block.
    ///
    /// Nothing is modified if the source fails to supply memory.
    fn extend(&mut self, words: u32) -> Option<u32> {
        let Self { source, heap } = self;
        let heap = heap.as_mut()?;

        let words = words.checked_add(words & 1)?;
        let size = words.checked_mul(WORD)?;
        let new_len = match heap.len.checked_add(size) {
            Some(x) if x <= MAX_HEAP_SIZE as u32 => x,
            _ => {
                log::debug!("growing the heap by {} bytes would exceed the limit", size);
                return None;
            }
        };

        // Safety: We own `source`
        let Some(region) = (unsafe { source.grow(size as usize) }) else {
            log::debug!("heap source failed to supply {} bytes", size);
            return None;
        };
        debug_assert_eq!(
            region.as_ptr() as usize,
            heap.base.as_ptr() as usize + heap.len as usize,
            "heap source returned a discontiguous region"
        );
        log::trace!("grew heap by {} bytes to {}", size, new_len);

        // The new block's header replaces the old epilogue
        let bp = heap.len;
        heap.len = new_len;

        // Safety: `bp - WORD..new_len` is the old epilogue plus the new region
        unsafe {
            heap.write_tags(bp, size, false);
            heap.set_word(new_len - WORD, pack(0, true));
            heap.insert(bp);
            Some(Self::coalesce(heap, bp))
        }
    }

    /// Attempt to allocate a block of memory with room for at least `size`
    /// bytes.
    ///
    /// Returns the starting address of the payload on success, which is
    /// aligned to [`ALIGNMENT`] bytes. Returns `None` if `size` is zero, the
    /// heap is not initialized, or the heap could not grow.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let asize = adjust_size(size)?;

        // Safety: The heap is bootstrapped
        let bp = match unsafe { self.heap.as_ref()?.find_fit(asize) } {
            Some(bp) => bp,
            None => self.extend(asize.max(CHUNK_SIZE as u32) / WORD)?,
        };

        let heap = self.heap.as_mut()?;
        // Safety: `bp` is a free block of at least `asize` bytes
        unsafe {
            heap.remove(bp);
            Self::place(heap, bp, asize);
        }

        let ptr = heap.ptr(bp);
        debug_assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
        Some(ptr)
    }

    /// Commit `asize` bytes at the start of the free block `bp` as allocated,
    /// splitting the rest off as a new free block if it's large enough to
    /// form one.
    ///
    /// # Safety
    ///
    /// `bp` must be a free block of at least `asize` bytes that is not in
    /// any bucket.
    unsafe fn place(heap: &mut Heap, bp: u32, asize: u32) {
        let csize = heap.size(bp);
        debug_assert!(csize >= asize);

        if csize - asize >= MIN_BLOCK_SIZE as u32 {
            heap.write_tags(bp, asize, true);
            let rest = bp + asize;
            heap.write_tags(rest, csize - asize, false);
            heap.insert(rest);
        } else {
            heap.write_tags(bp, csize, true);
        }
    }

    /// Deallocate a previously allocated memory block.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self` that
    /// has not been deallocated since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let heap = self
            .heap
            .as_mut()
            .unwrap_or_else(|| unreachable_uninit());
        let bp = heap.offset_of(ptr);
        debug_assert!(heap.is_allocated(bp), "double free of {:p}", ptr);

        let size = heap.size(bp);
        heap.write_tags(bp, size, false);
        heap.insert(bp);
        Self::coalesce(heap, bp);
    }

    /// Merge the free block `bp` with its free neighbors. Returns the merged
    /// block, which starts at the preceding block if that one was free.
    ///
    /// # Safety
    ///
    /// `bp` must be a free block that is in a bucket.
    unsafe fn coalesce(heap: &mut Heap, mut bp: u32) -> u32 {
        let prev_allocated = heap::tag_allocated(heap.word(bp - DWORD));
        let next = heap.next(bp);
        let next_allocated = heap.is_allocated(next);
        let mut size = heap.size(bp);

        if prev_allocated && next_allocated {
            return bp;
        }

        heap.remove(bp);

        if !next_allocated {
            heap.remove(next);
            size += heap.size(next);
        }

        if !prev_allocated {
            let prev = heap.prev(bp);
            heap.remove(prev);
            size += heap.size(prev);
            bp = prev;
        }

        heap.write_tags(bp, size, false);
        heap.insert(bp);
        bp
    }

    /// Shrink or grow a previously allocated memory block.
    ///
    /// Returns the new starting address of the memory block on success;
    /// `None` otherwise.
    ///
    ///  - If `ptr` is `None`, this is equivalent to [`Self::allocate`].
    ///  - If `new_size` is zero, the block is deallocated and `None` is
    ///    returned.
    ///  - If the block can't be resized in place, a new block is allocated,
    ///    the first `min(old usable size, new_size)` bytes are copied, and the
    ///    old block is deallocated. If that allocation fails, the old block is
    ///    left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or denote a memory block previously allocated
    /// via `self` that has not been deallocated since.
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            self.free(ptr);
            return None;
        }

        let asize = adjust_size(new_size)?;

        if let Some(x) = self.resize_in_place(ptr, asize) {
            return Some(x);
        }

        // Move the payload to a new block
        let old_size = self.usable_size(ptr);
        let new_ptr = self.allocate(new_size)?;
        log::trace!("moving {:p} ({} bytes) to {:p}", ptr, old_size, new_ptr);

        // Safety: Both are live allocations, so they don't overlap
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        self.free(ptr);

        Some(new_ptr)
    }

    /// A subroutine of [`Self::resize`]. Attempts to shrink the block or grow
    /// it into the following free block, preserving the starting address.
    #[inline]
    unsafe fn resize_in_place(&mut self, ptr: NonNull<u8>, asize: u32) -> Option<NonNull<u8>> {
        let heap = self
            .heap
            .as_mut()
            .unwrap_or_else(|| unreachable_uninit());
        let bp = heap.offset_of(ptr);
        let csize = heap.size(bp);
        debug_assert!(heap.is_allocated(bp));

        if asize < csize {
            let rest_size = csize - asize;
            if rest_size >= MIN_BLOCK_SIZE as u32 {
                heap.write_tags(bp, asize, true);
                let rest = bp + asize;
                heap.write_tags(rest, rest_size, false);
                heap.insert(rest);
                Self::coalesce(heap, rest);
            } else {
                // Too small to be a block of its own
            }
        } else if asize > csize {
            let grow_by = asize - csize;

            // Grow into the next free block. Fail if there isn't such a block.
            let next = heap.next(bp);
            if heap.is_allocated(next) {
                return None;
            }

            let next_size = heap.size(next);
            if grow_by > next_size {
                // Can't fit
                return None;
            }

            heap.remove(next);

            let rest_size = next_size - grow_by;
            if rest_size >= MIN_BLOCK_SIZE as u32 {
                heap.write_tags(bp, asize, true);
                let rest = bp + asize;
                heap.write_tags(rest, rest_size, false);
                heap.insert(rest);
            } else {
                heap.write_tags(bp, csize + next_size, true);
            }
        } else {
            // No size change
        }

        Some(ptr)
    }
}
