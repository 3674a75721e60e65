//! Heap walking and consistency checking.
//!
//! Everything here uses bounds-checked reads, so it's safe to run on a heap
//! whose tags have been damaged by an errant write.
use core::iter::FusedIterator;

use super::{
    heap::{
        pack, tag_allocated, tag_size, Block, Heap, DWORD, FIRST_BLOCK, PROLOGUE, PROLOGUE_SIZE,
        WORD,
    },
    list::classify,
    SegFit,
};
use crate::{HeapError, ALIGNMENT, MIN_BLOCK_SIZE, NUM_CLASSES};

/// An iterator over the blocks of a heap in address order, created by
/// [`SegFit::blocks`]. The prologue and the epilogue are not included.
///
/// The iteration stops early at the first block whose header doesn't make
/// sense.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    heap: Option<&'a Heap>,
    bp: u32,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let heap = self.heap?;
        let block = heap
            .checked_word(Heap::header(self.bp))
            .map(|tag| Block::from_tag(self.bp, tag))
            .filter(|block| block.size() != 0)
            .filter(|block| {
                (self.bp as usize)
                    .checked_add(block.size())
                    .map_or(false, |end| end <= heap.len as usize)
            });

        match block {
            Some(block) => {
                self.bp += block.size() as u32;
                Some(block)
            }
            None => {
                self.heap = None;
                None
            }
        }
    }
}

impl FusedIterator for Blocks<'_> {}

/// An iterator over one bucket of the free-list index, created by
/// [`SegFit::free_blocks`].
///
/// The iteration stops early at a link that points outside the heap, and
/// after visiting as many entries as could possibly fit in the heap.
#[derive(Debug, Clone)]
pub struct FreeBlocks<'a> {
    heap: Option<&'a Heap>,
    next: Option<u32>,
    fuel: u32,
}

impl Iterator for FreeBlocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let heap = self.heap?;
        let bp = self.next.take()?;

        let entry = self
            .fuel
            .checked_sub(1)
            .filter(|_| bp >= FIRST_BLOCK && bp as usize % ALIGNMENT == 0)
            .and_then(|fuel| {
                let tag = heap.checked_word(Heap::header(bp))?;
                let next = heap.checked_word(bp)?;
                Some((fuel, tag, next))
            });

        let Some((fuel, tag, next)) = entry else {
            self.heap = None;
            return None;
        };

        self.fuel = fuel;
        self.next = (next != 0).then_some(next);
        Some(Block::from_tag(bp, tag))
    }
}

impl FusedIterator for FreeBlocks<'_> {}

impl<S> SegFit<S> {
    /// Iterate over every block of the heap in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self.heap.as_ref(),
            bp: FIRST_BLOCK,
        }
    }

    /// Iterate over the free blocks in bucket `class` in list order.
    ///
    /// # Panics
    ///
    /// Panics if `class >= NUM_CLASSES`.
    pub fn free_blocks(&self, class: usize) -> FreeBlocks<'_> {
        assert!(class < NUM_CLASSES, "bucket {} does not exist", class);
        let heap = self.heap.as_ref();
        let head = heap
            .and_then(|heap| heap.checked_word(PROLOGUE + class as u32 * WORD))
            .filter(|&head| head != 0);
        FreeBlocks {
            heap,
            next: head,
            fuel: heap.map_or(0, |heap| heap.len / MIN_BLOCK_SIZE as u32),
        }
    }

    /// Verify the integrity of the heap and the free-list index.
    pub fn check(&self) -> Result<(), HeapError> {
        let heap = self.heap.as_ref().ok_or(HeapError::Uninitialized)?;

        let prologue = pack(PROLOGUE_SIZE, true);
        if heap.checked_word(Heap::header(PROLOGUE)) != Some(prologue)
            || heap.checked_word(PROLOGUE + PROLOGUE_SIZE - DWORD) != Some(prologue)
        {
            return Err(HeapError::BadPrologue);
        }

        // Walk the heap
        let mut bp = FIRST_BLOCK;
        let mut prev_free = false;
        let mut num_free = 0;
        loop {
            let offset = bp as usize;
            let header = heap
                .checked_word(Heap::header(bp))
                .ok_or(HeapError::OutOfBounds { offset })?;
            let size = tag_size(header);

            if size == 0 {
                // Must be the epilogue
                if !tag_allocated(header) || bp != heap.len {
                    return Err(HeapError::BadEpilogue { offset });
                }
                break;
            }

            if offset % ALIGNMENT != 0 {
                return Err(HeapError::Misaligned { offset });
            }
            if size < MIN_BLOCK_SIZE as u32 {
                return Err(HeapError::BadSize {
                    offset,
                    size: size as usize,
                });
            }

            let footer = bp
                .checked_add(size - DWORD)
                .and_then(|footer| heap.checked_word(footer))
                .ok_or(HeapError::OutOfBounds { offset })?;
            if footer != header {
                return Err(HeapError::TagMismatch {
                    offset,
                    header,
                    footer,
                });
            }

            let free = !tag_allocated(header);
            if free && prev_free {
                return Err(HeapError::AdjacentFree {
                    offset: offset - heap.checked_word(bp - DWORD).map_or(0, tag_size) as usize,
                });
            }
            prev_free = free;
            num_free += free as usize;

            bp += size;
        }

        // Walk the buckets
        let mut num_listed = 0;
        for class in 0..NUM_CLASSES {
            let mut prev: Option<Block> = None;
            for block in self.free_blocks(class) {
                let offset = block.offset();
                if block.is_allocated() {
                    return Err(HeapError::AllocatedInBucket { class, offset });
                }

                let expected = classify(block.size() as u32);
                if expected != class {
                    return Err(HeapError::WrongBucket {
                        class,
                        offset,
                        expected,
                    });
                }

                // The back link must point to the entry we came from
                let back = heap
                    .checked_word(block.offset() as u32 + WORD)
                    .ok_or(HeapError::BrokenLink { class, offset })?;
                if back != prev.map_or(0, |prev| prev.offset() as u32) {
                    return Err(HeapError::BrokenLink { class, offset });
                }

                if let Some(prev) = prev {
                    if block.size() > prev.size() {
                        return Err(HeapError::Unordered { class, offset });
                    }
                }

                num_listed += 1;
                if num_listed > num_free {
                    // Also catches cycles
                    return Err(HeapError::FreeCountMismatch {
                        in_heap: num_free,
                        in_buckets: num_listed,
                    });
                }
                prev = Some(block);
            }
        }

        if num_listed != num_free {
            return Err(HeapError::FreeCountMismatch {
                in_heap: num_free,
                in_buckets: num_listed,
            });
        }

        Ok(())
    }
}
