//! Memory growth providers
use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::ALIGNMENT;

/// The trait for memory sources a [`SegFit`](crate::SegFit) heap grows from.
///
/// # Safety
///
/// The region returned by [`grow`](Self::grow) must directly follow the region
/// returned by the previous successful call, must be valid for reads and
/// writes for the requested number of bytes, and must not be accessed by
/// anyone else or moved or released while the source is alive.
pub unsafe trait HeapSource {
    /// Append `bytes` bytes to the heap. Returns the starting address of the
    /// new region, or `None` if the source is exhausted.
    ///
    /// A failed call must not consume any memory.
    ///
    /// # Safety
    ///
    /// Only the heap that owns this source may call this method.
    unsafe fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>>;
}

/// A [`HeapSource`] that bumps through a caller-supplied memory block, in the
/// manner of `sbrk` over a fixed-size data segment.
///
/// The start of the block is rounded up to [`ALIGNMENT`] bytes.
///
/// # Examples
///
/// ```
/// use segfit::{ArenaSource, SegFit};
/// use std::mem::MaybeUninit;
///
/// let mut pool = [MaybeUninit::uninit(); 8192];
/// let mut heap = SegFit::new(ArenaSource::new(&mut pool));
/// heap.initialize().unwrap();
///
/// let ptr = heap.allocate(100).unwrap();
/// unsafe { heap.free(ptr) };
/// ```
#[derive(Debug)]
pub struct ArenaSource<'pool> {
    start: *mut u8,
    capacity: usize,
    brk: usize,
    _phantom: PhantomData<&'pool mut [MaybeUninit<u8>]>,
}

// Safety: The memory block is exclusively borrowed by `ArenaSource`
unsafe impl Send for ArenaSource<'_> {}

impl<'pool> ArenaSource<'pool> {
    /// Construct an `ArenaSource` handing out `pool`.
    #[inline]
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Self {
        let unaligned_start = pool.as_mut_ptr() as *mut u8;
        let pad = (unaligned_start as usize).wrapping_neg() & (ALIGNMENT - 1);
        Self {
            // `wrapping_add` because `pad` might exceed a tiny `pool`
            start: unaligned_start.wrapping_add(pad),
            capacity: pool.len().saturating_sub(pad),
            brk: 0,
            _phantom: PhantomData,
        }
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// The number of bytes still available.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }
}

unsafe impl HeapSource for ArenaSource<'_> {
    unsafe fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes > self.remaining() {
            return None;
        }
        let region = NonNull::new(self.start.add(self.brk))?;
        self.brk += bytes;
        Some(region)
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use self::unix::MmapSource;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec;

    #[test]
    fn arena_rounds_up_start() {
        let mut pool = vec![MaybeUninit::<u8>::uninit(); 64];
        let base = pool.as_ptr() as usize;
        let mut source = ArenaSource::new(&mut pool[3..]);

        let region = unsafe { source.grow(8) }.unwrap();
        assert_eq!(region.as_ptr() as usize % ALIGNMENT, 0);
        assert!(region.as_ptr() as usize >= base + 3);
        assert!(region.as_ptr() as usize + 8 <= base + 64);
    }

    #[test]
    fn arena_regions_are_contiguous() {
        let mut pool = vec![MaybeUninit::<u8>::uninit(); 256];
        let mut source = ArenaSource::new(&mut pool);

        let first = unsafe { source.grow(80) }.unwrap();
        let second = unsafe { source.grow(16) }.unwrap();
        assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 80);
        assert_eq!(source.used(), 96);
    }

    #[test]
    fn arena_exhaustion_consumes_nothing() {
        let mut pool = vec![MaybeUninit::<u8>::uninit(); 128];
        let mut source = ArenaSource::new(&mut pool);
        let remaining = source.remaining();

        assert!(unsafe { source.grow(remaining + 1) }.is_none());
        assert_eq!(source.remaining(), remaining);
        assert!(unsafe { source.grow(remaining) }.is_some());
        assert!(unsafe { source.grow(1) }.is_none());
    }

    #[test]
    fn arena_tiny_pool() {
        let mut pool = [MaybeUninit::<u8>::uninit(); 2];
        let mut source = ArenaSource::new(&mut pool);
        assert!(source.remaining() < 8);
        assert!(unsafe { source.grow(8) }.is_none());
    }
}
