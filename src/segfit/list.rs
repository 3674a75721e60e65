//! The segregated free-list index.
//!
//! Each bucket head is a word in the prologue's payload. A free block stores
//! the offset of the next entry in its first payload word and the offset of
//! the previous entry in its second payload word. Zero means "none" since no
//! block's payload lives at offset zero.
use super::heap::{Heap, PROLOGUE, WORD};
use crate::NUM_CLASSES;

/// Find the bucket for a block of the specified size: `floor(log2(size))`,
/// with the last bucket catching everything larger.
#[inline]
pub(super) fn classify(size: u32) -> usize {
    size.checked_ilog2()
        .map_or(0, |log2| (log2 as usize).min(NUM_CLASSES - 1))
}

/// Find the bucket a free block of `size` bytes is kept in.
///
/// # Examples
///
/// ```
/// assert_eq!(segfit::bucket_of(16), 4);
/// assert_eq!(segfit::bucket_of(4095), 11);
/// assert_eq!(segfit::bucket_of(1 << 20), segfit::NUM_CLASSES - 1);
/// ```
#[inline]
pub fn bucket_of(size: usize) -> usize {
    classify(u32::try_from(size).unwrap_or(u32::MAX))
}

#[inline]
fn link(word: u32) -> Option<u32> {
    (word != 0).then_some(word)
}

impl Heap {
    #[inline]
    const fn head_slot(class: usize) -> u32 {
        PROLOGUE + class as u32 * WORD
    }

    /// # Safety
    ///
    /// The heap must have been bootstrapped.
    #[inline]
    pub unsafe fn head(&self, class: usize) -> Option<u32> {
        debug_assert!(class < NUM_CLASSES);
        link(self.word(Self::head_slot(class)))
    }

    #[inline]
    unsafe fn set_head(&mut self, class: usize, bp: Option<u32>) {
        self.set_word(Self::head_slot(class), bp.unwrap_or(0));
    }

    /// # Safety
    ///
    /// `bp` must be a free block.
    #[inline]
    pub unsafe fn next_free(&self, bp: u32) -> Option<u32> {
        link(self.word(bp))
    }

    /// # Safety
    ///
    /// `bp` must be a free block.
    #[inline]
    pub unsafe fn prev_free(&self, bp: u32) -> Option<u32> {
        link(self.word(bp + WORD))
    }

    #[inline]
    unsafe fn set_next_free(&mut self, bp: u32, next: Option<u32>) {
        self.set_word(bp, next.unwrap_or(0));
    }

    #[inline]
    unsafe fn set_prev_free(&mut self, bp: u32, prev: Option<u32>) {
        self.set_word(bp + WORD, prev.unwrap_or(0));
    }

    /// Insert the specified free block to the corresponding bucket, after
    /// every entry at least as large as it.
    ///
    /// Updates the block's links.
    ///
    /// # Safety
    ///
    ///  - `bp` must be a free block whose tags are up-to-date.
    ///  - `bp` must not currently be in any bucket.
    ///
    pub unsafe fn insert(&mut self, bp: u32) {
        let size = self.size(bp);
        let class = classify(size);

        let mut prev = None;
        let mut next = self.head(class);
        while let Some(entry) = next {
            if size > self.size(entry) {
                break;
            }
            prev = next;
            next = self.next_free(entry);
        }

        self.set_next_free(bp, next);
        self.set_prev_free(bp, prev);

        if let Some(next) = next {
            self.set_prev_free(next, Some(bp));
        }

        if let Some(prev) = prev {
            self.set_next_free(prev, Some(bp));
        } else {
            self.set_head(class, Some(bp));
        }
    }

    /// Remove the specified free block from its bucket.
    ///
    /// # Safety
    ///
    ///  - `bp` must currently be in a bucket.
    ///  - The block's size must not have changed since it was inserted.
    ///
    pub unsafe fn remove(&mut self, bp: u32) {
        let next = self.next_free(bp);
        let prev = self.prev_free(bp);

        if let Some(next) = next {
            self.set_prev_free(next, prev);
        }

        if let Some(prev) = prev {
            self.set_next_free(prev, next);
        } else {
            let class = classify(self.size(bp));
            debug_assert_eq!(self.head(class), Some(bp));
            self.set_head(class, next);
        }
    }

    /// Search the buckets for a free block of at least `size` bytes, starting
    /// from the bucket `size` maps to. Returns the first sufficient entry,
    /// which is the largest one of the first bucket having any.
    ///
    /// # Safety
    ///
    /// The heap must have been bootstrapped.
    pub unsafe fn find_fit(&self, size: u32) -> Option<u32> {
        for class in classify(size)..NUM_CLASSES {
            let mut entry = self.head(class);
            while let Some(bp) = entry {
                if size <= self.size(bp) {
                    return Some(bp);
                }
                entry = self.next_free(bp);
            }
        }
        None
    }
}
