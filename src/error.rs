use thiserror::Error;

/// Why an allocation request produced no memory. None of these variants are
/// fatal: the heap is left exactly as it was before the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Zero-size requests always fail instead of returning a zero-length
    /// success value.
    #[error("zero-size allocations always fail")]
    ZeroSize,

    /// `count * element_size` does not fit in `usize`. Detected with checked
    /// arithmetic so it can never wrap into a too-small allocation.
    #[error("count * element size overflows usize")]
    SizeOverflow,

    /// No free block in any bin can hold the request, not even after all the
    /// coalescing that has already happened. The arena is never grown.
    /// Carries the size the caller asked for, before alignment rounding.
    #[error("no free block can hold {0} bytes")]
    OutOfMemory(usize),
}

/// Why a free request was rejected. Rejected frees never mutate heap state
/// and never dereference the offending pointer as a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FreeError {
    /// The pointer doesn't fall inside the arena at all.
    #[error("pointer {0:#x} does not belong to the arena")]
    OutOfArena(usize),

    /// The pointer is inside the arena but can't be a payload address we
    /// handed out: wrong alignment or no room for a header before it.
    #[error("pointer {0:#x} is not an allocation boundary")]
    Misaligned(usize),

    /// The header behind the pointer already reads FREE.
    #[error("block at {0:#x} is already free")]
    DoubleFree(usize),

    /// The bytes behind the pointer don't decode as a plausible block header.
    #[error("metadata at {0:#x} does not describe a block")]
    Corrupted(usize),
}

/// Construction-time errors. The arena is sized once and never grows, so a
/// capacity that can't hold even one block is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("capacity {requested} bytes cannot hold a single block (minimum {minimum})")]
    TooSmall { requested: usize, minimum: usize },
}
