use std::ptr::NonNull;

/// Abstraction over platform specific virtual memory calls. The arena needs
/// exactly two things from the operating system: one contiguous read-write
/// mapping at construction and its release on drop.
///
/// Backing memory must come straight from the kernel, never from
/// [`std::alloc`]: when [`crate::Binalloc`] is installed as the process
/// allocator, a `std::alloc` request here would dispatch right back into it
/// while the heap lock is still held.
trait PlatformSpecificMemory {
    /// Requests a mapping where `length` bytes can be written safely, or
    /// `None` if the kernel refuses.
    unsafe fn request_memory(length: usize) -> Option<NonNull<u8>>;

    /// Returns the mapping at `address` to the kernel. `length` must be the
    /// value the mapping was requested with.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
struct Platform;

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
    Platform::request_memory(length)
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            // Read-write, private to this process, not backed by any file.
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let address = libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0);

            if address == libc::MAP_FAILED {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            // On failure the mapping is still valid; there is nothing useful
            // to do with the error in a destructor.
            let _ = libc::munmap(address.cast().as_ptr(), length);
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::ptr::NonNull;

    use windows::Win32::System::Memory;

    use super::{Platform, PlatformSpecificMemory};

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            // Memory has to be reserved and then committed to become
            // usable; one call can do both. See
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc#parameters
            let protection = Memory::PAGE_READWRITE;
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, _length: usize) {
            // MEM_RELEASE frees the whole mapping and requires a length of
            // zero. See
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualfree#parameters
            let _ = Memory::VirtualFree(address.cast().as_ptr(), 0, Memory::MEM_RELEASE);
        }
    }
}

#[cfg(miri)]
mod miri {
    //! Miri has no FFI support, so the mapping is mocked with the global
    //! allocator. That also lets Miri spot an arena that is never returned.

    use std::{alloc, ptr::NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::align::ALIGNMENT;

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, ALIGNMENT).unwrap()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            NonNull::new(alloc::alloc(to_layout(length)))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }
    }
}
