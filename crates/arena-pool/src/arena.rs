//! The arena allocator engine.
//!
//! [`ArenaAllocator`] services every request from one caller-supplied buffer.
//! It keeps an address-ordered list of free blocks inside the buffer itself
//! and never asks the environment for memory.
//!
//! # Algorithm
//!
//! - **Bootstrap**: the whole arena becomes one free block at offset 0. One
//!   word is spent on its header, so the initial free space is
//!   `capacity - WORD_SIZE`.
//! - **Allocation**: the request is rounded up to a word multiple, and to at
//!   least the two link words a released block will need. The first
//!   free block (lowest address) that can hold it plus a free block header is
//!   split; the front part is handed out and the remainder takes the old
//!   block's place in the free list.
//! - **Release**: the block is linked back in address order and merged with a
//!   free neighbour on either side when they touch, so the list always holds
//!   maximal free runs.
//!
//! ```text
//! after bootstrap     │h│ free                                  │
//! allocate a, b       │h│ a      │h│ b      │h│ free              │
//! release a           │h│ free   │h│ b      │h│ free              │
//! release b           │h│ free                                  │
//! ```
//!
//! # Accounting
//!
//! `free_space` is the sum of the payload sizes of all free blocks. It is
//! compared against each request before the list is searched, which rejects
//! hopeless requests without a scan.

use core::{marker::PhantomData, ptr, ptr::NonNull};

use log::{debug, trace};
use snafu::ensure;

use crate::{
    block::{ArenaMemory, FREE_HEADER_SIZE, HEADER_SIZE, WORD_SIZE, payload_size},
    error::{
        ArenaError, InvalidArenaSnafu, InvalidRequestSizeSnafu, OutOfSpaceSnafu,
        UndefinedPointerSnafu,
    },
    free_list::{self, FreeList, SENTINEL},
};

/// A first-fit allocator confined to one borrowed buffer.
///
/// The allocator borrows the arena for `'a`. Pointers it hands out stay valid
/// until they are released or the allocator is re-initialized.
///
/// # Thread Safety
///
/// The allocator is `Send` but not `Sync`. Wrap it in a lock (see
/// [`LockedArena`](crate::LockedArena)) to share it.
pub struct ArenaAllocator<'a> {
    memory: Option<ArenaMemory>,
    capacity: usize,
    free_space: usize,
    free_list: FreeList,
    _arena: PhantomData<&'a mut [u8]>,
}

unsafe impl Send for ArenaAllocator<'_> {}

impl Default for ArenaAllocator<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl core::fmt::Debug for ArenaAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("base", &self.memory.map(ArenaMemory::base))
            .field("capacity", &self.capacity)
            .field("free_space", &self.free_space)
            .field("free_blocks", &self.free_blocks().count())
            .finish()
    }
}

impl<'a> ArenaAllocator<'a> {
    /// Creates an allocator with no arena.
    ///
    /// Every allocation fails with [`ArenaError::OutOfSpace`] until
    /// [`init`](Self::init) succeeds.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            memory: None,
            capacity: 0,
            free_space: 0,
            free_list: FreeList::new(),
            _arena: PhantomData,
        }
    }

    /// Creates an allocator managing `arena`.
    ///
    /// The start of the slice is aligned up to [`WORD_SIZE`] and its length
    /// truncated to a word multiple before use.
    ///
    /// # Examples
    ///
    /// ```
    /// use arena_pool::ArenaAllocator;
    ///
    /// let mut buffer = vec![0_u8; 256];
    /// let mut allocator = ArenaAllocator::from_slice(&mut buffer).unwrap();
    /// let ptr = allocator.allocate(32).unwrap();
    /// unsafe {
    ///     ptr.write_bytes(0xaa, 32);
    ///     allocator.release(ptr).unwrap();
    /// }
    /// ```
    pub fn from_slice(arena: &'a mut [u8]) -> Result<Self, ArenaError> {
        unsafe { Self::from_raw_parts(arena.as_mut_ptr(), arena.len()) }
    }

    /// Creates an allocator managing `address..address + capacity`.
    ///
    /// # Safety
    ///
    /// Unless `address` is null, the caller must ensure that:
    ///
    /// - the region `address..address + capacity` is valid for reads and
    ///   writes for `'a`
    /// - the region is not accessed by anything else for `'a`, except through
    ///   pointers returned by this allocator
    pub unsafe fn from_raw_parts(address: *mut u8, capacity: usize) -> Result<Self, ArenaError> {
        let mut allocator = Self::empty();
        unsafe { allocator.init(address, capacity)? };
        Ok(allocator)
    }

    /// Hands `address..address + capacity` to the allocator.
    ///
    /// On success all previous state is discarded: pointers allocated from a
    /// previous arena must no longer be passed to this allocator. On failure
    /// the allocator is left untouched.
    ///
    /// Fails with [`ArenaError::InvalidArena`] if `address` is null or if the
    /// word-aligned part of the region is not larger than a free block header.
    ///
    /// # Safety
    ///
    /// Same requirements as [`from_raw_parts`](Self::from_raw_parts).
    pub unsafe fn init(&mut self, address: *mut u8, capacity: usize) -> Result<(), ArenaError> {
        let invalid = InvalidArenaSnafu {
            address: address.addr(),
            capacity,
        };
        let Some(start) = NonNull::new(address) else {
            debug!("rejected arena: null address, capacity={capacity}");
            return invalid.fail();
        };

        let align_offset = address.align_offset(WORD_SIZE);
        let len = capacity.saturating_sub(align_offset) / WORD_SIZE * WORD_SIZE;
        if len <= FREE_HEADER_SIZE {
            debug!("rejected arena: address={address:p}, capacity={capacity}, usable={len}");
            return invalid.fail();
        }

        let memory = unsafe { ArenaMemory::new(start.add(align_offset), len) };
        let free_space = len - HEADER_SIZE;
        let mut free_list = FreeList::new();
        memory.set_block_size(0, free_space);
        free_list.insert_before(memory, 0, SENTINEL);

        *self = Self {
            memory: Some(memory),
            capacity: free_space,
            free_space,
            free_list,
            _arena: PhantomData,
        };
        trace!(
            "arena initialized: base={:p}, len={len}, free_space={free_space}",
            memory.base()
        );
        Ok(())
    }

    /// Returns `true` once an arena has been handed to the allocator.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.memory.is_some()
    }

    /// Returns the free space right after bootstrap: the word-aligned arena
    /// length minus one header.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the sum of the payload sizes of all free blocks.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.free_space
    }

    /// Allocates a block able to hold `size` bytes.
    ///
    /// The returned pointer is word aligned and the block behind it holds
    /// `size` rounded up to a word multiple, and never less than
    /// [`MIN_PAYLOAD_SIZE`](crate::block::MIN_PAYLOAD_SIZE) bytes. Its
    /// contents are unspecified.
    ///
    /// Fails with [`ArenaError::InvalidRequestSize`] if `size` is zero and
    /// with [`ArenaError::OutOfSpace`] if no free block is large enough.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        ensure!(size > 0, InvalidRequestSizeSnafu);

        let out_of_space = OutOfSpaceSnafu {
            requested: size,
            free_space: self.free_space,
        };
        let Some(memory) = self.memory else {
            return out_of_space.fail();
        };
        let Some((need, required)) =
            payload_size(size).and_then(|need| Some((need, need.checked_add(FREE_HEADER_SIZE)?)))
        else {
            return out_of_space.fail();
        };

        if self.free_space <= required {
            debug!(
                "allocation rejected: size={size}, need={need}, free_space={}",
                self.free_space
            );
            return out_of_space.fail();
        }

        let Some(block) = self
            .free_list
            .iter(memory)
            .find(|&block| memory.block_size(block) >= required)
        else {
            debug!(
                "no free block fits: size={size}, need={need}, free_space={}",
                self.free_space
            );
            return out_of_space.fail();
        };

        self.split(memory, block, need);
        let payload = memory.payload(block);
        trace!(
            "allocated: block={block:#x}, size={}, free_space={}",
            memory.block_size(block),
            self.free_space
        );
        Ok(payload)
    }

    /// Carves `need` bytes from the front of the free block `block`.
    fn split(&mut self, memory: ArenaMemory, block: usize, need: usize) {
        let size = memory.block_size(block);
        assert!(size >= need, "block too small to split");

        if size - need < FREE_HEADER_SIZE {
            // The remainder could not hold its own free header.
            self.free_list.unlink(memory, block);
            self.free_space -= size;
            return;
        }

        let remainder = block + HEADER_SIZE + need;
        let remainder_size = size - need - HEADER_SIZE;
        self.free_list.replace(memory, block, remainder);
        memory.set_block_size(remainder, remainder_size);
        memory.set_block_size(block, need);
        self.free_space -= need + HEADER_SIZE;
    }

    /// Allocates a block able to hold `size` bytes and zeroes its first `size`
    /// bytes.
    ///
    /// Fails the same way as [`allocate`](Self::allocate).
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let ptr = self.allocate(size)?;
        unsafe { ptr.write_bytes(0, size) };
        Ok(ptr)
    }

    /// Moves the allocation at `ptr` into a new block of `new_size` bytes.
    ///
    /// The first `min(old size, new_size)` bytes are copied and the old block
    /// is released. If the new block cannot be allocated the old one is left
    /// exactly as it was and the error is returned.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by this allocator and
    /// has not been released. Obviously foreign or already released pointers
    /// are rejected with [`ArenaError::UndefinedPointer`], but the check is
    /// not exhaustive.
    pub unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, ArenaError> {
        let (memory, block) = self.live_block(ptr)?;
        let old_size = memory.block_size(block);

        let new_ptr = self.allocate(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        }
        self.release_block(memory, block);
        Ok(new_ptr)
    }

    /// Returns the block at `ptr` to the free list.
    ///
    /// The block is merged with the free blocks directly before and after it.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by this allocator, has
    /// not been released, and that the memory behind it is not used
    /// afterwards. Obviously foreign or already released pointers are rejected
    /// with [`ArenaError::UndefinedPointer`], but the check is not exhaustive.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<(), ArenaError> {
        let (memory, block) = self.live_block(ptr)?;
        self.release_block(memory, block);
        Ok(())
    }

    fn release_block(&mut self, memory: ArenaMemory, block: usize) {
        let size = memory.block_size(block);
        self.free_space += size;

        let anchor = self
            .free_list
            .iter(memory)
            .find(|&free| free > block)
            .unwrap_or(SENTINEL);
        self.free_list.insert_before(memory, block, anchor);

        let next = self.free_list.next(memory, block);
        self.try_merge(memory, block, next);
        let previous = self.free_list.previous(memory, block);
        self.try_merge(memory, previous, block);

        trace!(
            "released: block={block:#x}, size={size}, free_space={}",
            self.free_space
        );
    }

    /// Absorbs `upper` into `lower` if both are free blocks and `upper` starts
    /// where `lower` ends.
    fn try_merge(&mut self, memory: ArenaMemory, lower: usize, upper: usize) {
        if lower == SENTINEL || upper == SENTINEL || memory.block_end(lower) != upper {
            return;
        }

        let merged = memory.block_size(lower) + HEADER_SIZE + memory.block_size(upper);
        self.free_list.unlink(memory, upper);
        memory.set_block_size(lower, merged);
        self.free_space += HEADER_SIZE;
        trace!("coalesced: lower={lower:#x}, upper={upper:#x}, size={merged}");
    }

    /// Looks up the allocated block whose payload starts at `ptr`.
    fn live_block(&self, ptr: NonNull<u8>) -> Result<(ArenaMemory, usize), ArenaError> {
        let undefined = UndefinedPointerSnafu {
            address: ptr.addr().get(),
        };
        let Some((memory, block)) = self
            .memory
            .and_then(|memory| Some((memory, memory.header_of(ptr.as_ptr())?)))
        else {
            debug!("pointer outside arena: ptr={ptr:p}");
            return undefined.fail();
        };

        let end = memory.block_end(block);
        let overlaps_free = self
            .free_list
            .iter(memory)
            .take_while(|&free| free < end)
            .any(|free| memory.block_end(free) > block);
        if overlaps_free {
            debug!("pointer names a free block: ptr={ptr:p}, block={block:#x}");
            return undefined.fail();
        }

        Ok((memory, block))
    }

    /// Returns the payload size of the live allocation at `ptr`.
    ///
    /// This is the requested size rounded up by
    /// [`payload_size`](crate::block::payload_size).
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, ArenaError> {
        let (memory, block) = self.live_block(ptr)?;
        Ok(memory.block_size(block))
    }

    /// Returns `true` if `ptr` points into the arena.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.memory.is_some_and(|memory| {
            ptr.addr()
                .checked_sub(memory.base().addr().get())
                .is_some_and(|offset| offset < memory.len())
        })
    }

    /// Iterates over the free list from the lowest address upwards.
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            inner: self.memory.map(|memory| self.free_list.iter(memory)),
            memory: self.memory,
        }
    }

    /// Walks every block of the arena, free or allocated, in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            allocator: self,
            offset: 0,
            next_free: self.memory.map_or(SENTINEL, |memory| {
                self.free_list.next(memory, SENTINEL)
            }),
        }
    }

    /// Summarizes the current arena usage.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            capacity: self.capacity,
            free_space: self.free_space,
            ..ArenaStats::default()
        };
        for block in self.blocks() {
            match block.state {
                BlockState::Free { .. } => {
                    stats.free_blocks += 1;
                    stats.largest_free_block = stats.largest_free_block.max(block.size);
                }
                BlockState::Allocated => {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size;
                }
            }
        }
        stats
    }
}

/// A free block as seen through [`ArenaAllocator::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeBlock {
    /// Offset of the block header from the arena base.
    pub offset: usize,
    /// Payload bytes the block can hold.
    pub size: usize,
}

pub struct FreeBlocks<'a> {
    inner: Option<free_list::Iter<'a>>,
    memory: Option<ArenaMemory>,
}

impl Iterator for FreeBlocks<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.inner.as_mut()?.next()?;
        let memory = self.memory?;
        Some(FreeBlock {
            offset,
            size: memory.block_size(offset),
        })
    }
}

/// Whether a block is on the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum BlockState {
    /// On the free list, between `previous` and `next` (`None` for the list
    /// ends).
    Free {
        previous: Option<usize>,
        next: Option<usize>,
    },
    /// Handed out to a caller.
    Allocated,
}

/// A block as seen through [`ArenaAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Offset of the block header from the arena base.
    pub offset: usize,
    /// Payload bytes the block can hold.
    pub size: usize,
    pub state: BlockState,
}

impl BlockInfo {
    /// Returns the offset one past the block's last payload byte.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }
}

pub struct Blocks<'a> {
    allocator: &'a ArenaAllocator<'a>,
    offset: usize,
    next_free: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let memory = self.allocator.memory?;
        if self.offset >= memory.len() {
            return None;
        }

        let offset = self.offset;
        let size = memory.block_size(offset);
        let state = if offset == self.next_free {
            let list = &self.allocator.free_list;
            let link = |node| (node != SENTINEL).then_some(node);
            self.next_free = list.next(memory, offset);
            BlockState::Free {
                previous: link(list.previous(memory, offset)),
                next: link(self.next_free),
            }
        } else {
            BlockState::Allocated
        };

        self.offset = memory.block_end(offset);
        Some(BlockInfo {
            offset,
            size,
            state,
        })
    }
}

/// Snapshot of arena usage returned by [`ArenaAllocator::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaStats {
    pub capacity: usize,
    pub free_space: usize,
    pub free_blocks: usize,
    pub largest_free_block: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
}
