use core::ptr::NonNull;

use super::HeapSource;

/// A [`HeapSource`] backed by an anonymous memory mapping.
///
/// The whole `capacity` is reserved with `MAP_NORESERVE` on the first call to
/// [`grow`](HeapSource::grow), and later calls bump through it, so the heap
/// never moves. Pages are only committed by the kernel as they are touched.
/// The mapping is released when the source is dropped.
#[derive(Debug)]
pub struct MmapSource {
    capacity: usize,
    start: Option<NonNull<u8>>,
    brk: usize,
}

// Safety: The mapping is exclusively owned by `MmapSource`
unsafe impl Send for MmapSource {}

impl MmapSource {
    /// Construct an `MmapSource` that can supply up to `capacity` bytes.
    #[inline]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            start: None,
            brk: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub const fn used(&self) -> usize {
        self.brk
    }

    #[cold]
    fn reserve(&mut self) -> Option<NonNull<u8>> {
        // Safety: Creating a new private mapping doesn't affect any existing
        //         memory
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                self.capacity,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            log::debug!("mmap of {} bytes failed", self.capacity);
            return None;
        }

        log::trace!("reserved {} bytes at {:p}", self.capacity, ptr);
        let start = NonNull::new(ptr as *mut u8)?;
        self.start = Some(start);
        Some(start)
    }
}

unsafe impl HeapSource for MmapSource {
    unsafe fn grow(&mut self, bytes: usize) -> Option<NonNull<u8>> {
        if bytes > self.capacity - self.brk {
            return None;
        }

        let start = match self.start {
            Some(start) => start,
            None => self.reserve()?,
        };

        let region = NonNull::new_unchecked(start.as_ptr().add(self.brk));
        self.brk += bytes;
        Some(region)
    }
}

impl Drop for MmapSource {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            // Safety: `start..start + capacity` is the mapping we created
            unsafe { libc::munmap(start.as_ptr() as *mut _, self.capacity) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_reservation() {
        let mut source = MmapSource::new(1 << 20);
        assert!(source.start.is_none());

        let first = unsafe { source.grow(4096) }.unwrap();
        let second = unsafe { source.grow(80) }.unwrap();
        assert_eq!(first.as_ptr() as usize % crate::ALIGNMENT, 0);
        assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 4096);

        unsafe { second.as_ptr().write_bytes(0xa5, 80) };
        assert_eq!(source.used(), 4096 + 80);
    }

    #[test]
    fn exhaustion() {
        let mut source = MmapSource::new(8192);
        assert!(unsafe { source.grow(8193) }.is_none());
        assert!(unsafe { source.grow(8192) }.is_some());
        assert!(unsafe { source.grow(8) }.is_none());
    }
}
