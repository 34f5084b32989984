//! First-fit memory allocator over a fixed, caller-supplied arena.
//!
//! The allocator never requests memory from the environment. Every block it
//! hands out is carved from one buffer given at initialization, and released
//! blocks are merged with their free neighbours so the arena can be reused.
//!
//! # Usage
//!
//! ```rust
//! use arena_pool::{ArenaAllocator, WORD_SIZE};
//!
//! let mut buffer = vec![0_usize; 64];
//! let capacity = buffer.len() * WORD_SIZE;
//! let mut arena =
//!     unsafe { ArenaAllocator::from_raw_parts(buffer.as_mut_ptr().cast(), capacity) }.unwrap();
//! assert_eq!(arena.free_space(), capacity - WORD_SIZE);
//!
//! let a = arena.allocate(32).unwrap();
//! let b = arena.allocate_zeroed(16).unwrap();
//! assert!(b.addr().get() >= a.addr().get() + 32);
//!
//! unsafe {
//!     a.write_bytes(0x42, 32);
//!     let a = arena.resize(a, 64).unwrap();
//!     assert_eq!(a.read(), 0x42);
//!     arena.release(a).unwrap();
//!     arena.release(b).unwrap();
//! }
//!
//! // everything is merged back into one block
//! assert_eq!(arena.free_blocks().count(), 1);
//! assert_eq!(arena.free_space(), capacity - WORD_SIZE);
//! ```
//!
//! # Design Considerations
//!
//! - Block metadata lives inside the arena. An allocated block costs one
//!   header word; a free block needs room for a header and two list links.
//! - Payloads are aligned to [`WORD_SIZE`] only.
//! - Allocation and release are O(n) in the number of free blocks.
//! - [`ArenaAllocator`] is single-owner. [`LockedArena`] serializes access
//!   with a spin lock and implements [`GlobalAlloc`](core::alloc::GlobalAlloc).

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use self::{
    arena::{ArenaAllocator, ArenaStats, BlockInfo, BlockState, Blocks, FreeBlock, FreeBlocks},
    block::{FREE_HEADER_SIZE, HEADER_SIZE, WORD_SIZE},
    error::{ArenaError, ArenaErrorKind},
    locked::LockedArena,
};

mod arena;
pub mod block;
pub mod error;
mod free_list;
mod locked;
