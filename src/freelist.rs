use crate::{
    arena::Arena,
    header::BlockHeader,
};

/// Number of size classes, including the unbounded catch-all.
pub(crate) const BIN_COUNT: usize = 6;

/// Upper payload bound of each bounded bin. Anything above the last bound
/// lands in the catch-all bin.
const BIN_LIMITS: [usize; BIN_COUNT - 1] = [64, 128, 256, 512, 1024];

/// Maps a payload size to its bin index. Monotonic: `a <= b` implies
/// `class_of(a) <= class_of(b)`, which is what lets [`Bins::find_fit`] scan
/// classes upward without ever skipping a block that could fit.
pub(crate) fn class_of(payload_size: usize) -> usize {
    BIN_LIMITS
        .iter()
        .position(|&limit| payload_size <= limit)
        .unwrap_or(BIN_COUNT - 1)
}

/// The segregated free-list index: one unordered doubly-linked list of FREE
/// blocks per size class. The lists are intrusive, threaded through the
/// `prev_free`/`next_free` words of the block headers themselves, so
/// membership changes are O(1) and cost no memory beyond the headers the
/// blocks already carry. Only the list heads live here.
///
/// ```text
/// heads[0] (<= 64)   -> [32] -> [8] -> [64]
/// heads[1] (<= 128)  -> [72]
/// heads[2] (<= 256)  ->
/// heads[3] (<= 512)  -> [384] -> [512]
/// heads[4] (<= 1024) ->
/// heads[5] (rest)    -> [523384]
/// ```
///
/// Order within a bin is insertion order and deliberately meaningless: any
/// block in a bin is an acceptable answer for a request the bin covers, so
/// insert just prepends. The bins manage links only; flipping block state is
/// the engine's job.
pub(crate) struct Bins {
    heads: [Option<usize>; BIN_COUNT],
    len: usize,
}

impl Bins {
    pub const fn new() -> Self {
        Self {
            heads: [None; BIN_COUNT],
            len: 0,
        }
    }

    /// Total number of free blocks across all bins.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Head of the given bin's list, for the dump and for tests.
    #[inline]
    pub fn head(&self, class: usize) -> Option<usize> {
        self.heads[class]
    }

    /// Prepends `block` to the bin its payload size selects. O(1).
    pub fn insert(&mut self, arena: &mut Arena, block: usize) {
        let mut header = BlockHeader::load(arena, block);
        let class = class_of(header.payload_size);

        debug_assert!(header.is_free());

        header.prev_free = None;
        header.next_free = self.heads[class];
        header.store(arena, block);

        if let Some(old_head) = self.heads[class] {
            let mut old_header = BlockHeader::load(arena, old_head);
            old_header.prev_free = Some(block);
            old_header.store(arena, old_head);
        }

        self.heads[class] = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` from its bin using its own links, wherever it sits in
    /// the list. O(1). Must be called before the engine changes the block's
    /// payload size, because the bin is derived from it.
    pub fn remove(&mut self, arena: &mut Arena, block: usize) {
        let mut header = BlockHeader::load(arena, block);
        let class = class_of(header.payload_size);

        match header.prev_free {
            Some(prev) => {
                let mut prev_header = BlockHeader::load(arena, prev);
                prev_header.next_free = header.next_free;
                prev_header.store(arena, prev);
            }
            None => {
                debug_assert_eq!(self.heads[class], Some(block));
                self.heads[class] = header.next_free;
            }
        }

        if let Some(next) = header.next_free {
            let mut next_header = BlockHeader::load(arena, next);
            next_header.prev_free = header.prev_free;
            next_header.store(arena, next);
        }

        header.prev_free = None;
        header.next_free = None;
        header.store(arena, block);

        self.len -= 1;
    }

    /// First-fit-by-class search: scan bins from `class_of(size)` upward and
    /// return the first block whose payload holds `size` bytes. `None` is
    /// the out-of-memory signal.
    pub fn find_fit(&self, arena: &Arena, size: usize) -> Option<usize> {
        for class in class_of(size)..BIN_COUNT {
            let mut current = self.heads[class];

            while let Some(block) = current {
                let header = BlockHeader::load(arena, block);

                if header.payload_size >= size {
                    return Some(block);
                }

                current = header.next_free;
            }
        }

        None
    }
}
