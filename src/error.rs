/// The error type returned by [`SegFit::initialize`](crate::SegFit::initialize).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("the heap source could not supply {requested} more bytes")]
    Exhausted { requested: usize },
    #[error("the heap source returned memory aligned to {align} bytes (at least 8 required)")]
    Misaligned { align: usize },
    #[error("the heap is already initialized")]
    AlreadyInitialized,
}

/// An inconsistency found by [`SegFit::check`](crate::SegFit::check).
///
/// Offsets are payload offsets from the start of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("the heap is not initialized")]
    Uninitialized,
    #[error("the prologue block is damaged")]
    BadPrologue,
    #[error("the epilogue at {offset} is damaged or is not the last word of the heap")]
    BadEpilogue { offset: usize },
    #[error("block {offset} is not aligned to 8 bytes")]
    Misaligned { offset: usize },
    #[error("block {offset} has an invalid size {size}")]
    BadSize { offset: usize, size: usize },
    #[error("block {offset} extends past the end of the heap")]
    OutOfBounds { offset: usize },
    #[error("block {offset} has header {header:#x} but footer {footer:#x}")]
    TagMismatch {
        offset: usize,
        header: u32,
        footer: u32,
    },
    #[error("free blocks {offset} and its successor were not coalesced")]
    AdjacentFree { offset: usize },
    #[error("bucket {class} links to allocated block {offset}")]
    AllocatedInBucket { class: usize, offset: usize },
    #[error("block {offset} is in bucket {class} but belongs in bucket {expected}")]
    WrongBucket {
        class: usize,
        offset: usize,
        expected: usize,
    },
    #[error("block {offset} in bucket {class} is larger than its predecessor")]
    Unordered { class: usize, offset: usize },
    #[error("block {offset} in bucket {class} has a broken link")]
    BrokenLink { class: usize, offset: usize },
    #[error("{in_heap} free blocks in the heap but {in_buckets} in the buckets")]
    FreeCountMismatch { in_heap: usize, in_buckets: usize },
}
