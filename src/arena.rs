use std::{
    alloc::{handle_alloc_error, Layout},
    ptr::{self, NonNull},
};

use crate::{align::ALIGNMENT, platform};

/// Size of one metadata word. All block metadata is encoded as little-endian
/// words of this size, see [`crate::header`].
pub(crate) const WORD_SIZE: usize = 8;

/// The fixed backing store for the whole heap. One contiguous mapping is
/// requested from the operating system exactly once, at construction, and
/// returned when the arena is dropped; nothing else ever talks to the
/// kernel. Every other module addresses memory through arena-relative byte
/// offsets, which keeps the metadata encoding portable and makes bounds
/// checks available at every place an offset is decoded.
///
/// The arena never grows and is never exposed to callers directly; the only
/// addresses that escape are payload pointers produced by
/// [`Arena::payload_ptr`].
pub(crate) struct Arena {
    base: NonNull<u8>,
    capacity: usize,
}

impl Arena {
    /// Reserves `capacity` bytes. `capacity` must be a non-zero multiple of
    /// [`ALIGNMENT`]; [`crate::heap::Heap`] validates that before calling.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity % ALIGNMENT == 0);

        // The mapping comes from the kernel, not from `std::alloc`: a
        // `std::alloc` request here would dispatch back into this allocator
        // when it is installed as the process allocator, with the heap lock
        // still held.
        // SAFETY: capacity is non-zero and page mappings are at least
        // page-aligned, far beyond ALIGNMENT.
        let Some(base) = (unsafe { platform::request_memory(capacity) }) else {
            handle_alloc_error(Layout::from_size_align(capacity, ALIGNMENT).expect("arena layout"));
        };

        Self { base, capacity }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Translates an arena offset into the pointer handed to the caller.
    #[inline]
    pub fn payload_ptr(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.capacity);
        // SAFETY: offset is in bounds, so the result is non-null and inside
        // the allocation.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Translates a caller pointer back into an arena offset, or `None` if
    /// the pointer doesn't fall inside the arena. This is the first validity
    /// check on every free: an out-of-arena pointer is never dereferenced.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;

        if addr < base || addr >= base + self.capacity {
            return None;
        }

        Some(addr - base)
    }

    /// Reads the little-endian metadata word at `offset`.
    #[inline]
    pub fn read_word(&self, offset: usize) -> u64 {
        assert!(offset + WORD_SIZE <= self.capacity);

        let mut bytes = [0u8; WORD_SIZE];
        // SAFETY: bounds checked above.
        unsafe {
            ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), bytes.as_mut_ptr(), WORD_SIZE);
        }

        u64::from_le_bytes(bytes)
    }

    /// Writes the little-endian metadata word at `offset`.
    #[inline]
    pub fn write_word(&mut self, offset: usize, value: u64) {
        assert!(offset + WORD_SIZE <= self.capacity);

        let bytes = value.to_le_bytes();
        // SAFETY: bounds checked above.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), WORD_SIZE);
        }
    }

    /// Fills `len` bytes starting at `offset` with `value`. Used to zero
    /// payloads for zeroed allocations.
    pub fn fill(&mut self, offset: usize, len: usize, value: u8) {
        assert!(offset + len <= self.capacity);

        // SAFETY: bounds checked above.
        unsafe {
            self.base.as_ptr().add(offset).write_bytes(value, len);
        }
    }

    /// Copies `len` bytes from `src` to `dst`, both arena offsets. The two
    /// ranges come from different blocks in practice, but `ptr::copy` keeps
    /// this correct even if they ever overlapped.
    pub fn copy(&mut self, src: usize, dst: usize, len: usize) {
        assert!(src + len <= self.capacity && dst + len <= self.capacity);

        // SAFETY: bounds checked above.
        unsafe {
            ptr::copy(self.base.as_ptr().add(src), self.base.as_ptr().add(dst), len);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base was requested with exactly this length in `new`.
        unsafe {
            platform::return_memory(self.base, self.capacity);
        }
    }
}

// SAFETY: the arena is the sole owner of its mapping; sending it to another
// thread moves that ownership along with it.
unsafe impl Send for Arena {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_round_trip() {
        let mut arena = Arena::new(64);

        arena.write_word(0, 0xDEAD_BEEF);
        arena.write_word(56, u64::MAX);

        assert_eq!(arena.read_word(0), 0xDEAD_BEEF);
        assert_eq!(arena.read_word(56), u64::MAX);
    }

    #[test]
    fn offsets_and_pointers_are_inverses() {
        let arena = Arena::new(128);

        for offset in (0..128).step_by(8) {
            let ptr = arena.payload_ptr(offset);
            assert_eq!(arena.offset_of(ptr), Some(offset));
        }
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let arena = Arena::new(64);

        let mut local = 0u8;
        let foreign = NonNull::from(&mut local);

        assert_eq!(arena.offset_of(foreign), None);
    }

    #[test]
    fn fill_and_copy_move_bytes() {
        let mut arena = Arena::new(64);

        arena.fill(0, 8, 0xAB);
        arena.copy(0, 32, 8);

        assert_eq!(arena.read_word(32), u64::from_le_bytes([0xAB; 8]));
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_read_panics() {
        let arena = Arena::new(64);
        arena.read_word(64);
    }
}
