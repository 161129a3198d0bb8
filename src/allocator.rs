use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::{Mutex, PoisonError},
};

use tracing::warn;

use crate::{
    align::ALIGNMENT,
    error::{AllocError, ArenaError, FreeError},
    heap::{Heap, HeapStats},
};

/// The public allocator: a [`Heap`] behind a single [`Mutex`].
///
/// The engine needs `&mut self` and touches neighbor blocks and bucket lists
/// non-locally when it splits and coalesces, so one coarse lock around every
/// call is the correctness boundary here; anything finer-grained would need
/// a different design (per-bin locks plus an arena lock for physical
/// merges).
///
/// # Examples
///
/// ## Standalone heap
///
/// ```rust
/// use binalloc::Binalloc;
///
/// let heap = Binalloc::with_capacity(4096).unwrap();
///
/// let ptr = heap.allocate(128).unwrap();
/// unsafe {
///     ptr.as_ptr().write_bytes(0x42, 128);
///     assert_eq!(ptr.as_ptr().read(), 0x42);
///     heap.free(ptr).unwrap();
/// }
/// ```
///
/// ## Global allocator
///
/// [`Binalloc::new`] is `const` and defers building the arena to the first
/// call, so it can back the whole process through the stable
/// [`GlobalAlloc`] trait (alignments above 8 are refused with a null
/// return):
///
/// ```no_run
/// use binalloc::Binalloc;
///
/// #[global_allocator]
/// static ALLOCATOR: Binalloc = Binalloc::new();
///
/// fn main() {
///     let data = vec![1, 2, 3];
///     assert_eq!(data.len(), 3);
/// }
/// ```
pub struct Binalloc {
    /// `None` until the first call: the lazily built default-capacity arena.
    /// Eager constructors start out as `Some`.
    heap: Mutex<Option<Heap>>,
}

impl Binalloc {
    /// An allocator over the default 1 MiB arena. The arena itself is
    /// reserved lazily on the first call, which is what makes this `const`
    /// and therefore usable in a `static`.
    pub const fn new() -> Self {
        Self {
            heap: Mutex::new(None),
        }
    }

    /// An allocator over an arena of `capacity` bytes, reserved eagerly so
    /// an unusable capacity fails here and not on some later allocation.
    pub fn with_capacity(capacity: usize) -> Result<Self, ArenaError> {
        Ok(Self {
            heap: Mutex::new(Some(Heap::with_capacity(capacity)?)),
        })
    }

    /// Runs `f` under the lock, building the default heap on first use.
    ///
    /// A poisoned lock means some thread panicked while holding it; the
    /// heap's own validity checks are all that's left at that point, so we
    /// keep serving rather than poisoning every caller forever.
    fn with_heap<T>(&self, f: impl FnOnce(&mut Heap) -> T) -> T {
        let mut guard = self.heap.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(Heap::new))
    }

    /// Hands out at least `size` usable bytes, 8-byte aligned. Fails with
    /// [`AllocError::ZeroSize`] for `size == 0` and
    /// [`AllocError::OutOfMemory`] when no free block fits; the arena never
    /// grows to satisfy a request.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.with_heap(|heap| heap.allocate(size))
    }

    /// Allocates `count * elem_size` bytes, zero-filled. Overflow of the
    /// multiplication fails closed with [`AllocError::SizeOverflow`].
    pub fn allocate_zeroed(
        &self,
        count: usize,
        elem_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        self.with_heap(|heap| heap.allocate_zeroed(count, elem_size))
    }

    /// Returns an allocation to the heap. Invalid pointers and double frees
    /// are reported through the error and leave the heap untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a pointer this allocator returned that the caller will
    /// not use again. See [`Heap::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        self.with_heap(|heap| unsafe { heap.free(ptr) })
    }

    /// Resizes an allocation, preserving the payload prefix. `None` behaves
    /// exactly like [`Binalloc::allocate`]. On failure the original block
    /// and its contents are untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// A `Some` pointer must be live and produced by this allocator; on
    /// success it is invalidated. See [`Heap::reallocate`].
    pub unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        self.with_heap(|heap| match ptr {
            Some(ptr) => unsafe { heap.reallocate(ptr, new_size) },
            None => heap.allocate(new_size),
        })
    }

    /// Human-readable snapshot of the bins and the physical block map.
    ///
    /// The returned `String` grows through the Rust heap while the lock is
    /// held, so this is for standalone heaps; on an instance installed as
    /// the process allocator those growths would dispatch back into the
    /// held lock. Use [`Binalloc::stats`] there instead.
    pub fn dump(&self) -> String {
        self.with_heap(|heap| heap.dump())
    }

    /// Accounting snapshot of the heap.
    pub fn stats(&self) -> HeapStats {
        self.with_heap(|heap| heap.stats())
    }
}

impl Default for Binalloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for Binalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match self.allocate(layout.size()) {
            Ok(address) => address.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match self.allocate_zeroed(layout.size(), 1) {
            Ok(address) => address.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        // The free contract is report-and-ignore, never crash.
        if let Err(reason) = self.free(ptr) {
            warn!(error = %reason, "ignored invalid free");
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match self.reallocate(NonNull::new(ptr), new_size) {
            Ok(address) => address.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;

    #[test]
    fn wrapper_round_trip() {
        let allocator = Binalloc::with_capacity(64 * 1024).unwrap();

        unsafe {
            let first = allocator.allocate(8).unwrap();
            first.as_ptr().write_bytes(69, 8);

            let second = allocator.allocate(4096).unwrap();
            second.as_ptr().write_bytes(42, 4096);

            for i in 0..8 {
                assert_eq!(first.as_ptr().add(i).read(), 69);
            }
            allocator.free(first).unwrap();

            for i in 0..4096 {
                assert_eq!(second.as_ptr().add(i).read(), 42);
            }
            allocator.free(second).unwrap();
        }

        let stats = allocator.stats();
        assert_eq!(stats.used_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }

    #[test]
    fn lazy_default_builds_on_first_call() {
        let allocator = Binalloc::new();

        let stats = allocator.stats();
        assert_eq!(stats.capacity, crate::heap::DEFAULT_CAPACITY);

        let ptr = allocator.allocate(16).unwrap();
        unsafe { allocator.free(ptr).unwrap() };
    }

    #[test]
    fn reallocate_none_is_plain_allocation() {
        let allocator = Binalloc::with_capacity(4096).unwrap();

        unsafe {
            let ptr = allocator.reallocate(None, 100).unwrap();
            allocator.free(ptr).unwrap();
        }
    }

    #[test]
    fn global_alloc_respects_the_alignment_limit() {
        let allocator = Binalloc::with_capacity(4096).unwrap();

        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % 8, 0);
            allocator.dealloc(ptr, layout);

            let too_aligned = Layout::from_size_align(64, 16).unwrap();
            assert!(allocator.alloc(too_aligned).is_null());
        }
    }

    #[test]
    fn global_alloc_zeroed_and_realloc() {
        let allocator = Binalloc::with_capacity(4096).unwrap();

        unsafe {
            let layout = Layout::from_size_align(32, 8).unwrap();

            let ptr = allocator.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            for i in 0..32 {
                assert_eq!(ptr.add(i).read(), 0);
            }

            ptr.write_bytes(0x11, 32);
            let grown = allocator.realloc(ptr, layout, 128);
            assert!(!grown.is_null());
            for i in 0..32 {
                assert_eq!(grown.add(i).read(), 0x11);
            }

            allocator.dealloc(grown, Layout::from_size_align(128, 8).unwrap());
        }

        assert_eq!(allocator.stats().used_blocks, 0);
    }

    #[test]
    fn global_dealloc_swallows_bad_pointers() {
        let allocator = Binalloc::with_capacity(4096).unwrap();
        let layout = Layout::from_size_align(8, 8).unwrap();

        unsafe {
            // Null is a no-op.
            allocator.dealloc(ptr::null_mut(), layout);

            // A foreign pointer is reported and ignored, not dereferenced.
            let mut local = 0u8;
            allocator.dealloc(&mut local, layout);

            // And a double free leaves the heap consistent.
            let ptr = allocator.alloc(layout);
            allocator.dealloc(ptr, layout);
            allocator.dealloc(ptr, layout);
        }

        assert_eq!(allocator.stats().free_blocks, 1);
    }

    /// All threads allocate at the same time, then all free at the same
    /// time.
    #[test]
    fn multiple_threads_synchronized_allocs_and_frees() {
        let allocator = Binalloc::new();

        let num_threads = 8;
        let barrier = Barrier::new(num_threads);

        thread::scope(|scope| {
            for t in 0..num_threads {
                let allocator = &allocator;
                let barrier = &barrier;

                scope.spawn(move || unsafe {
                    let size = 8192;
                    let ptr = allocator.allocate(size).unwrap();
                    ptr.as_ptr().write_bytes(t as u8, size);

                    barrier.wait();

                    // Nobody else scribbled over our block.
                    for i in 0..size {
                        assert_eq!(ptr.as_ptr().add(i).read(), t as u8);
                    }

                    allocator.free(ptr).unwrap();
                });
            }
        });

        let stats = allocator.stats();
        assert_eq!(stats.used_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }

    /// Threads allocate and free interleaved, with different sizes so
    /// contention covers several bins.
    #[test]
    fn multiple_threads_unsynchronized_allocs_and_frees() {
        let allocator = Binalloc::new();

        let num_threads = 8;
        let barrier = Barrier::new(num_threads);

        thread::scope(|scope| {
            for _ in 0..num_threads {
                let allocator = &allocator;
                let barrier = &barrier;

                scope.spawn(move || unsafe {
                    for size in [16, 256, 1024, 2048, 4096] {
                        barrier.wait();

                        for round in 0..100u8 {
                            let ptr = allocator.allocate(size).unwrap();

                            ptr.as_ptr().write_bytes(round, size);
                            for i in 0..size {
                                assert_eq!(ptr.as_ptr().add(i).read(), round);
                            }

                            allocator.free(ptr).unwrap();
                        }
                    }
                });
            }
        });

        let stats = allocator.stats();
        assert_eq!(stats.used_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }
}
