//! Raw heap access and boundary-tag navigation.
use core::ptr::NonNull;

/// The size of a boundary tag or a free-list link.
pub(super) const WORD: u32 = 4;
/// Header plus footer.
pub(super) const DWORD: u32 = 8;

/// The bit of a boundary tag indicating whether the block is allocated.
const TAG_ALLOCATED: u32 = 1;
/// The bits of a boundary tag indicating the block's size.
const TAG_SIZE_MASK: u32 = !0x7;

/// The offset of the prologue block's payload, which holds the bucket heads.
pub(super) const PROLOGUE: u32 = 2 * WORD;
/// The size of the prologue block.
pub(super) const PROLOGUE_SIZE: u32 = DWORD + crate::NUM_CLASSES as u32 * WORD;
/// The number of bytes written by the bootstrap: a padding word, the prologue
/// and the first epilogue header.
pub(super) const BOOTSTRAP_SIZE: u32 = PROLOGUE_SIZE + 2 * WORD;
/// The payload offset of the first real block.
pub(super) const FIRST_BLOCK: u32 = BOOTSTRAP_SIZE;

/// Pack a size and an allocation flag into a boundary tag.
#[inline]
pub(super) const fn pack(size: u32, allocated: bool) -> u32 {
    size | allocated as u32
}

#[inline]
pub(super) const fn tag_size(tag: u32) -> u32 {
    tag & TAG_SIZE_MASK
}

#[inline]
pub(super) const fn tag_allocated(tag: u32) -> bool {
    (tag & TAG_ALLOCATED) != 0
}

/// A block descriptor decoded from a block's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    offset: u32,
    size: u32,
    allocated: bool,
}

impl Block {
    #[inline]
    pub(super) const fn from_tag(offset: u32, tag: u32) -> Self {
        Self {
            offset,
            size: tag_size(tag),
            allocated: tag_allocated(tag),
        }
    }

    /// The payload's byte offset from the start of the heap. This is what
    /// identifies a block.
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset as usize
    }

    /// The size of the whole block, including the header and the footer.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size as usize
    }

    #[inline]
    pub const fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// The number of bytes the block can hold when allocated.
    #[inline]
    pub const fn payload_size(&self) -> usize {
        (self.size - DWORD) as usize
    }
}

/// The bounds of the heap region.
///
/// `base` is aligned to [`crate::ALIGNMENT`] bytes and valid for `len`
/// bytes. Every block is addressed by its payload's offset from `base`.
#[derive(Debug, Clone, Copy)]
pub(super) struct Heap {
    pub base: NonNull<u8>,
    pub len: u32,
}

impl Heap {
    /// Read the word at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be word-aligned and `offset + WORD <= self.len`.
    #[inline]
    pub unsafe fn word(&self, offset: u32) -> u32 {
        debug_assert_eq!(offset % WORD, 0);
        debug_assert!(
            offset as u64 + WORD as u64 <= self.len as u64,
            "read at {} is outside the heap (len = {})",
            offset,
            self.len
        );
        self.base.as_ptr().add(offset as usize).cast::<u32>().read()
    }

    /// Write the word at `offset`.
    ///
    /// # Safety
    ///
    /// See [`Self::word`].
    #[inline]
    pub unsafe fn set_word(&mut self, offset: u32, value: u32) {
        debug_assert_eq!(offset % WORD, 0);
        debug_assert!(
            offset as u64 + WORD as u64 <= self.len as u64,
            "write at {} is outside the heap (len = {})",
            offset,
            self.len
        );
        self.base
            .as_ptr()
            .add(offset as usize)
            .cast::<u32>()
            .write(value)
    }

    /// Read the word at `offset` if it lies inside the heap. Used by code that
    /// must not trust the tags it is walking.
    #[inline]
    pub fn checked_word(&self, offset: u32) -> Option<u32> {
        if offset % WORD != 0 || offset.checked_add(WORD)? > self.len {
            return None;
        }
        // Safety: The bounds were just checked
        Some(unsafe { self.word(offset) })
    }

    #[inline]
    pub fn ptr(&self, bp: u32) -> NonNull<u8> {
        debug_assert!(bp < self.len);
        // Safety: `bp` lies inside the heap, which doesn't start at null
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(bp as usize)) }
    }

    /// Convert a payload pointer back into a block offset.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> u32 {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        debug_assert!(
            offset < self.len as usize,
            "{:p} does not belong to this heap",
            ptr
        );
        offset as u32
    }

    /// The header of the block whose payload is at `bp`.
    #[inline]
    pub const fn header(bp: u32) -> u32 {
        bp - WORD
    }

    /// # Safety
    ///
    /// `bp` must denote a block with a valid header.
    #[inline]
    pub unsafe fn footer(&self, bp: u32) -> u32 {
        bp + self.size(bp) - DWORD
    }

    /// # Safety
    ///
    /// `bp` must denote a block with a valid header.
    #[inline]
    pub unsafe fn size(&self, bp: u32) -> u32 {
        tag_size(self.word(Self::header(bp)))
    }

    /// # Safety
    ///
    /// `bp` must denote a block with a valid header.
    #[inline]
    pub unsafe fn is_allocated(&self, bp: u32) -> bool {
        tag_allocated(self.word(Self::header(bp)))
    }

    /// # Safety
    ///
    /// `bp` must denote a block with a valid header.
    #[inline]
    pub unsafe fn block(&self, bp: u32) -> Block {
        Block::from_tag(bp, self.word(Self::header(bp)))
    }

    /// Get the block physically following `bp`. This is the epilogue for the
    /// last block.
    ///
    /// # Safety
    ///
    /// `bp` must denote a block with a valid header.
    #[inline]
    pub unsafe fn next(&self, bp: u32) -> u32 {
        let next = bp + self.size(bp);
        debug_assert!(next < self.len);
        next
    }

    /// Get the block physically preceding `bp`. This is the prologue for the
    /// first block.
    ///
    /// # Safety
    ///
    /// `bp` must denote a block that is not the prologue, and the preceding
    /// block's footer must be valid.
    #[inline]
    pub unsafe fn prev(&self, bp: u32) -> u32 {
        let prev_size = tag_size(self.word(bp - DWORD));
        debug_assert!(prev_size != 0 && prev_size <= bp - PROLOGUE);
        bp - prev_size
    }

    /// Write the header and the footer of a block.
    ///
    /// # Safety
    ///
    /// `bp - WORD..bp + size - WORD` must lie inside the heap and must not
    /// overlap any live payload.
    #[inline]
    pub unsafe fn write_tags(&mut self, bp: u32, size: u32, allocated: bool) {
        debug_assert_eq!(size % crate::ALIGNMENT as u32, 0);
        let tag = pack(size, allocated);
        self.set_word(Self::header(bp), tag);
        self.set_word(bp + size - DWORD, tag);
    }
}
