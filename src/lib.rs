//! A general-purpose dynamic memory allocator over a single fixed-size
//! arena. The arena is reserved once, up front; at runtime the allocator
//! never asks the operating system for memory, never grows, and serves
//! every request by managing blocks inside that one buffer:
//!
//! ```text
//!          +--------+--------------+--------+--------------+--------+
//! arena -> | Block  |    Block     | Block  |    Block     | Block  |
//!          | (used) |    (free)    | (used) |    (free)    | (used) |
//!          +--------+------|-------+--------+------|-------+--------+
//!                          |                       |
//!            Bin[1] -------+         Bin[3] -------+
//! ```
//!
//! Blocks tile the arena with no gaps and no overlaps. Each one carries an
//! explicit header and a redundant size footer ([`header`]), free blocks are
//! indexed by segregated size-class bins ([`freelist`]), and the engine
//! ([`heap`]) splits blocks on allocation and coalesces them immediately on
//! free. [`Binalloc`] wraps the engine in a mutex and also implements
//! [`std::alloc::GlobalAlloc`], so it can serve as a drop-in process
//! allocator for 8-byte-aligned layouts.
//!
//! Misuse is reported, not fatal: freeing a foreign pointer, freeing twice
//! or overflowing a zeroed-allocation size all come back as errors
//! ([`AllocError`], [`FreeError`]) and leave the heap untouched.

mod align;
mod allocator;
mod arena;
mod error;
mod freelist;
mod header;
mod heap;
mod platform;

pub use align::ALIGNMENT;
pub use allocator::Binalloc;
pub use error::{AllocError, ArenaError, FreeError};
pub use heap::{HeapStats, DEFAULT_CAPACITY};
