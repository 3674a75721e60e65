use core::{
    alloc,
    cell::UnsafeCell,
    ops,
    ptr::{self, NonNull},
};

use crate::{MmapSource, SegFit, ALIGNMENT, MAX_HEAP_SIZE};

/// The amount of address space reserved for the heap.
const RESERVE: usize = if usize::BITS >= 64 {
    MAX_HEAP_SIZE
} else {
    1 << 28
};

type TheSegFit = SegFit<MmapSource>;

/// [`SegFit`] as a global allocator, serialized by a `pthread` mutex.
///
/// The heap is created on first use. Layouts requiring an alignment larger
/// than [`ALIGNMENT`] can't be satisfied and are reported as allocation
/// failures.
///
/// The mutex must not be moved once it has been locked, so a `GlobalSegFit`
/// should live in a `static`.
pub struct GlobalSegFit {
    inner: UnsafeCell<TheSegFit>,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

// Safety: `inner` is only accessed while `mutex` is held
unsafe impl Send for GlobalSegFit {}
unsafe impl Sync for GlobalSegFit {}

impl GlobalSegFit {
    /// The initializer.
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(SegFit::new(MmapSource::new(RESERVE))),
            mutex: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        }
    }
}

impl Default for GlobalSegFit {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalSegFit {
    /// Lock the allocator, creating the heap if it doesn't exist yet. Returns
    /// `None` if the heap could not be created.
    #[inline]
    fn lock_inner(&self) -> Option<impl ops::DerefMut<Target = TheSegFit> + '_> {
        struct LockGuard<'a>(&'a GlobalSegFit);

        impl ops::Deref for LockGuard<'_> {
            type Target = TheSegFit;

            #[inline]
            fn deref(&self) -> &Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &*self.0.inner.get() }
            }
        }

        impl ops::DerefMut for LockGuard<'_> {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &mut *self.0.inner.get() }
            }
        }

        impl Drop for LockGuard<'_> {
            #[inline]
            fn drop(&mut self) {
                unsafe { libc::pthread_mutex_unlock(self.0.mutex.get()) };
            }
        }

        unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        let mut guard = LockGuard(self);

        if !guard.is_initialized() {
            if let Err(e) = guard.initialize() {
                log::debug!("failed to create the global heap: {}", e);
                return None;
            }
        }

        Some(guard)
    }

    /// Verify the integrity of the heap. See [`SegFit::check`].
    pub fn check(&self) -> Result<(), crate::HeapError> {
        match self.lock_inner() {
            Some(inner) => inner.check(),
            None => Err(crate::HeapError::Uninitialized),
        }
    }
}

unsafe impl alloc::GlobalAlloc for GlobalSegFit {
    #[inline]
    unsafe fn alloc(&self, layout: alloc::Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.lock_inner()
            .and_then(|mut inner| inner.allocate(layout.size()))
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: alloc::Layout) {
        // Safety: All allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        if let Some(mut inner) = self.lock_inner() {
            // Safety: `ptr` denotes a previous allocation
            inner.free(ptr);
        }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: alloc::Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // Safety: All allocations are non-null
        let ptr = NonNull::new_unchecked(ptr);
        // Safety: `ptr` denotes a previous allocation, and `new_size` is
        //         non-zero, so the old block is never freed without
        //         replacement
        self.lock_inner()
            .and_then(|mut inner| inner.resize(Some(ptr), new_size))
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }
}
