#![cfg(unix)]
// The allocator only guarantees 8-byte alignment, which is less than what
// `std` expects of `#[global_allocator]` on 64-bit targets, so these tests
// drive it through `GlobalAlloc` directly.
use std::{
    alloc::{GlobalAlloc, Layout},
    thread,
};

static A: segfit::GlobalSegFit = segfit::GlobalSegFit::new();

fn layout(size: usize) -> Layout {
    Layout::from_size_align(size, 8).unwrap()
}

#[test]
fn alloc_dealloc() {
    unsafe {
        let ptr = A.alloc(layout(100));
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 8, 0);
        ptr.write_bytes(0x42, 100);
        A.dealloc(ptr, layout(100));
    }
    A.check().unwrap();
}

#[test]
fn realloc_preserves_contents() {
    unsafe {
        let ptr = A.alloc(layout(16));
        assert!(!ptr.is_null());
        for i in 0..16 {
            *ptr.add(i) = i as u8;
        }

        let blocker = A.alloc(layout(16));
        let ptr = A.realloc(ptr, layout(16), 5000);
        assert!(!ptr.is_null());
        for i in 0..16 {
            assert_eq!(*ptr.add(i), i as u8);
        }

        let ptr = A.realloc(ptr, layout(5000), 4);
        assert!(!ptr.is_null());
        for i in 0..4 {
            assert_eq!(*ptr.add(i), i as u8);
        }

        A.dealloc(ptr, layout(4));
        A.dealloc(blocker, layout(16));
    }
    A.check().unwrap();
}

#[test]
fn larger_than_word_alignment_fails() {
    unsafe {
        let layout = Layout::from_size_align(64, 32).unwrap();
        assert!(A.alloc(layout).is_null());

        let ptr = A.alloc(self::layout(64));
        assert!(!ptr.is_null());
        assert!(A.realloc(ptr, layout, 128).is_null());
        A.dealloc(ptr, self::layout(64));
    }
}

#[test]
fn cannot_alloc_max_usize_minus_some() {
    // The test should complete without causing OOM
    for offset in (0..64).step_by(8) {
        let layout = Layout::from_size_align(usize::MAX - offset, 1).unwrap();
        for _ in 0..10000 {
            let result = unsafe { A.alloc(layout) };
            assert!(result.is_null());
        }
    }
}

#[test]
fn threads() {
    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            thread::spawn(move || {
                let mut live = Vec::new();
                for i in 0..2000usize {
                    let size = 1 + (i * 37 + t as usize * 101) % 700;
                    let ptr = unsafe { A.alloc(layout(size)) };
                    assert!(!ptr.is_null());
                    unsafe { ptr.write_bytes(t, size) };
                    live.push((ptr as usize, size));

                    if i % 3 == 0 {
                        let (ptr, size) = live.swap_remove(i % live.len());
                        let ptr = ptr as *mut u8;
                        for k in 0..size {
                            assert_eq!(unsafe { *ptr.add(k) }, t);
                        }
                        unsafe { A.dealloc(ptr, layout(size)) };
                    }
                }
                for (ptr, size) in live {
                    unsafe { A.dealloc(ptr as *mut u8, layout(size)) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    A.check().unwrap();
}
