use std::ptr::NonNull;

use crate::{
    align::{align_up, is_aligned, ALIGNMENT},
    arena::Arena,
    error::{AllocError, ArenaError, FreeError},
    freelist::{Bins, BIN_COUNT},
    header::{
        block_of, payload_of, prev_via_footer, read_footer, BlockHeader, BlockState,
        BLOCK_OVERHEAD, FOOTER_SIZE, HEADER_SIZE,
    },
};

/// Arena capacity used by [`Heap::new`] and the [`Default`] wrapper: 1 MiB.
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

/// The block-management engine. Owns the arena and the free-list bins and
/// implements the four allocation primitives on top of them: fit search,
/// splitting, coalescing and the validity checks that keep bad free calls
/// from corrupting live blocks.
///
/// Blocks tile the arena with no gaps and no overlaps. A block is born once
/// (the initial spanning free block, or a split remainder), then only ever
/// shrinks, grows or flips between FREE and USED; when two free neighbors
/// coalesce, the absorbed block's identity simply disappears into the
/// survivor. Two invariants are maintained across every operation:
///
/// * no two physically adjacent blocks are both free (coalescing is
///   immediate and never partial), and
/// * a block sits in exactly one bin iff it is free.
///
/// The engine is single-threaded and needs `&mut self`; [`crate::Binalloc`]
/// wraps it in a [`std::sync::Mutex`] for the public API.
pub(crate) struct Heap {
    arena: Arena,
    bins: Bins,
}

/// Point-in-time accounting of the heap, computed by walking the physical
/// block sequence. `capacity` counts everything, the byte counters count
/// payloads only, so the difference is header/footer overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub capacity: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// Snapshot of one physical block, produced by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockInfo {
    pub offset: usize,
    pub payload_size: usize,
    pub state: BlockState,
}

/// Walks the arena in address order using only the size fields, the same
/// way an external harness would verify the "no gaps, no overlaps"
/// invariant. Deliberately ignores the `next_phys` links so it doubles as a
/// cross-check on them.
pub(crate) struct Blocks<'a> {
    arena: &'a Arena,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.offset >= self.arena.capacity() {
            return None;
        }

        let header = BlockHeader::load(self.arena, self.offset);
        debug_assert_eq!(read_footer(self.arena, self.offset), header.payload_size);

        let info = BlockInfo {
            offset: self.offset,
            payload_size: header.payload_size,
            state: header.state,
        };

        self.offset = header.end_offset(self.offset);
        Some(info)
    }
}

impl Heap {
    /// Builds a heap over a fresh arena of `capacity` bytes (rounded down to
    /// the alignment unit) holding one free block that spans all of it.
    pub fn with_capacity(capacity: usize) -> Result<Self, ArenaError> {
        let capacity = capacity & !(ALIGNMENT - 1);
        let minimum = BLOCK_OVERHEAD + ALIGNMENT;

        if capacity < minimum {
            return Err(ArenaError::TooSmall {
                requested: capacity,
                minimum,
            });
        }

        let mut arena = Arena::new(capacity);
        let mut bins = Bins::new();

        let initial = BlockHeader {
            payload_size: capacity - BLOCK_OVERHEAD,
            state: BlockState::Free,
            prev_phys: None,
            next_phys: None,
            prev_free: None,
            next_free: None,
        };
        initial.store(&mut arena, 0);
        bins.insert(&mut arena, 0);

        Ok(Self { arena, bins })
    }

    /// Builds a heap over the default 1 MiB arena.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY).expect("default capacity holds at least one block")
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Hands out at least `size` usable bytes, 8-byte aligned. Never returns
    /// a block smaller than the rounded request and never grows the arena:
    /// if no bin yields a fit, the caller gets [`AllocError::OutOfMemory`]
    /// and the heap is untouched.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let payload = self.allocate_block(size)?;
        Ok(self.arena.payload_ptr(payload))
    }

    /// Like [`Heap::allocate`] for `count * elem_size` bytes, with the
    /// payload zero-filled before it is returned. The multiplication is
    /// checked; overflow fails closed instead of wrapping into a too-small
    /// allocation.
    pub fn allocate_zeroed(
        &mut self,
        count: usize,
        elem_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let total = count
            .checked_mul(elem_size)
            .ok_or(AllocError::SizeOverflow)?;

        let payload = self.allocate_block(total)?;
        self.arena.fill(payload, total, 0);

        Ok(self.arena.payload_ptr(payload))
    }

    /// Returns `ptr`'s block to the free lists, merging it with any free
    /// physical neighbor. Rejected pointers (outside the arena, not a
    /// payload boundary, already free, garbage metadata) are reported
    /// through the error and leave the heap untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must either be a pointer this heap returned that the caller
    /// will not use again, or something that fails validation. Freeing a
    /// still-live allocation lets a later allocation hand the same bytes to
    /// someone else.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let addr = ptr.as_ptr() as usize;

        let Some(payload) = self.arena.offset_of(ptr) else {
            return Err(FreeError::OutOfArena(addr));
        };

        if payload < HEADER_SIZE || !is_aligned(payload) {
            return Err(FreeError::Misaligned(addr));
        }

        let block = block_of(payload);

        let Some(mut header) = BlockHeader::try_load(&self.arena, block) else {
            return Err(FreeError::Corrupted(addr));
        };

        if header.is_free() {
            return Err(FreeError::DoubleFree(addr));
        }

        header.state = BlockState::Free;
        header.store(&mut self.arena, block);

        // The freed block enters the index only once, after all merging is
        // done, so a multi-way merge can never leave a stale bin entry.
        let merged = self.coalesce(block);
        self.bins.insert(&mut self.arena, merged);

        Ok(())
    }

    /// Resizes the allocation behind `ptr` to hold at least `new_size`
    /// bytes, preserving the payload prefix. A block that already satisfies
    /// the request is returned as is; there is no shrink-in-place. On
    /// failure the original block and its contents are untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a pointer this heap returned and still live. On
    /// success it is invalidated, exactly like a freed pointer.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let payload = self
            .arena
            .offset_of(ptr)
            .expect("pointer does not belong to this heap");
        let block = block_of(payload);
        let header = BlockHeader::load(&self.arena, block);

        if header.payload_size >= new_size {
            return Ok(ptr);
        }

        // Allocate first: if this fails the old block is still intact.
        let new_payload = self.allocate_block(new_size)?;
        self.arena
            .copy(payload, new_payload, header.payload_size.min(new_size));

        // An internally produced pointer can't fail validation.
        let freed = self.free(ptr);
        debug_assert!(freed.is_ok());

        Ok(self.arena.payload_ptr(new_payload))
    }

    /// Human-readable snapshot of the bins and of the physical block
    /// sequence. Read-only; debugging and tests only.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "=== Heap bins ===");

        for class in 0..BIN_COUNT {
            let _ = write!(out, "Bin[{class}]: ");

            let mut current = self.bins.head(class);
            while let Some(block) = current {
                let header = BlockHeader::load(&self.arena, block);
                let _ = write!(out, "[{}]", header.payload_size);

                current = header.next_free;
                if current.is_some() {
                    let _ = write!(out, "->");
                }
            }

            let _ = writeln!(out);
        }

        let _ = writeln!(out, "=== Physical map ===");
        for info in self.blocks() {
            let state = if info.state == BlockState::Free {
                "free"
            } else {
                "used"
            };
            let _ = writeln!(
                out,
                "Block @ {:#08x} | size={} | {state}",
                info.offset, info.payload_size
            );
        }

        out
    }

    /// Iterates the physical blocks in arena order. See [`Blocks`].
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            arena: &self.arena,
            offset: 0,
        }
    }

    /// Accounting snapshot, see [`HeapStats`].
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            capacity: self.arena.capacity(),
            ..HeapStats::default()
        };

        for info in self.blocks() {
            match info.state {
                BlockState::Used => {
                    stats.used_blocks += 1;
                    stats.used_bytes += info.payload_size;
                }
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.free_bytes += info.payload_size;
                    stats.largest_free = stats.largest_free.max(info.payload_size);
                }
            }
        }

        debug_assert_eq!(stats.free_blocks, self.bins.len());
        stats
    }

    /// Shared implementation of the allocating operations. Returns the
    /// payload *offset* of a block marked USED.
    ///
    /// Out-of-memory errors always carry the caller's requested size, not
    /// the rounded one.
    fn allocate_block(&mut self, size: usize) -> Result<usize, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if size > self.arena.capacity() {
            return Err(AllocError::OutOfMemory(size));
        }

        let aligned = align_up(size);

        let block = self
            .bins
            .find_fit(&self.arena, aligned)
            .ok_or(AllocError::OutOfMemory(size))?;

        self.bins.remove(&mut self.arena, block);
        self.split(block, aligned);

        let mut header = BlockHeader::load(&self.arena, block);
        header.state = BlockState::Used;
        header.store(&mut self.arena, block);

        Ok(payload_of(block))
    }

    /// Carves the tail of a free block that is about to be handed out into
    /// a new free block, so a large block can serve a small request without
    /// wasting the difference:
    ///
    /// ```text
    /// before: | header |            848 bytes            | footer |
    /// after:  | header | 64 | footer | header | 728 bytes | footer |
    /// ```
    ///
    /// If the leftover wouldn't even hold a header, footer and one
    /// alignment unit of payload, the block is left alone and the caller
    /// just gets a bit more space than asked for.
    fn split(&mut self, block: usize, size: usize) {
        let mut header = BlockHeader::load(&self.arena, block);
        let remaining = header.payload_size - size;

        if remaining < BLOCK_OVERHEAD + ALIGNMENT {
            return;
        }

        let new_block = payload_of(block) + size + FOOTER_SIZE;
        let new_header = BlockHeader {
            payload_size: remaining - BLOCK_OVERHEAD,
            state: BlockState::Free,
            prev_phys: Some(block),
            next_phys: header.next_phys,
            prev_free: None,
            next_free: None,
        };
        new_header.store(&mut self.arena, new_block);

        if let Some(next) = header.next_phys {
            let mut next_header = BlockHeader::load(&self.arena, next);
            next_header.prev_phys = Some(new_block);
            next_header.store(&mut self.arena, next);
        }

        header.payload_size = size;
        header.next_phys = Some(new_block);
        header.store(&mut self.arena, block);

        self.bins.insert(&mut self.arena, new_block);
    }

    /// Merges the just-freed block at `block` with its free physical
    /// neighbors and returns the surviving block's offset. Merge order is
    /// forward then backward; either way the result is a single block
    /// spanning every merged range, absorbed metadata included. The caller
    /// inserts the survivor into the bins, so at no point does a half-merged
    /// block sit in the index.
    fn coalesce(&mut self, block: usize) -> usize {
        let mut header = BlockHeader::load(&self.arena, block);

        if let Some(next) = header.next_phys {
            let next_header = BlockHeader::load(&self.arena, next);

            if next_header.is_free() {
                self.bins.remove(&mut self.arena, next);

                header.payload_size += BLOCK_OVERHEAD + next_header.payload_size;
                header.next_phys = next_header.next_phys;
                header.store(&mut self.arena, block);

                if let Some(after) = header.next_phys {
                    let mut after_header = BlockHeader::load(&self.arena, after);
                    after_header.prev_phys = Some(block);
                    after_header.store(&mut self.arena, after);
                }
            }
        }

        if let Some(prev) = header.prev_phys {
            debug_assert_eq!(prev_via_footer(&self.arena, block), Some(prev));

            if BlockHeader::load(&self.arena, prev).is_free() {
                // Unlink before growing: the bin is derived from the size.
                self.bins.remove(&mut self.arena, prev);

                let mut prev_header = BlockHeader::load(&self.arena, prev);
                prev_header.payload_size += BLOCK_OVERHEAD + header.payload_size;
                prev_header.next_phys = header.next_phys;
                prev_header.store(&mut self.arena, prev);

                if let Some(after) = header.next_phys {
                    let mut after_header = BlockHeader::load(&self.arena, after);
                    after_header.prev_phys = Some(prev);
                    after_header.store(&mut self.arena, after);
                }

                return prev;
            }
        }

        block
    }
}
