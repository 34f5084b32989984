//! Block layout inside the arena.
//!
//! Every chunk of the arena, free or allocated, starts with a one-word header
//! holding the number of payload bytes the block owns. The payload follows
//! the header directly. While a block is free, the first two payload words
//! hold the offsets of its neighbours in the free list.
//!
//! ```text
//!             Free block                  Allocated block
//!  offset  ┌─────────────────────┐      ┌─────────────────────┐
//!    +0    │ size                │      │ size                │
//!          ├─────────────────────┤      ├─────────────────────┤
//!    +W    │ previous free block │      │                     │
//!          ├─────────────────────┤      │                     │
//!    +2W   │ next free block     │      │       payload       │
//!          ├─────────────────────┤      │                     │
//!          │ unused              │      │                     │
//!          └─────────────────────┘      └─────────────────────┘
//! ```
//!
//! Blocks are named by their byte offset from the arena base, never by raw
//! address. All offsets and sizes are multiples of [`WORD_SIZE`].

use core::ptr::NonNull;

/// Size of a machine word. Every block size and offset is a multiple of it.
pub const WORD_SIZE: usize = size_of::<usize>();

/// Size of the header in front of every block's payload.
pub const HEADER_SIZE: usize = WORD_SIZE;

/// Footprint of a free block's metadata: the size word plus both list links.
///
/// A free block must be at least this large, so allocation always leaves this
/// much margin in the block it splits.
pub const FREE_HEADER_SIZE: usize = HEADER_SIZE + 2 * WORD_SIZE;

/// Smallest payload any block is given.
///
/// A released block stores both list links in its payload, so it can never be
/// smaller than that.
pub const MIN_PAYLOAD_SIZE: usize = FREE_HEADER_SIZE - HEADER_SIZE;

const SIZE_FIELD: usize = 0;
const PREVIOUS_FIELD: usize = WORD_SIZE;
const NEXT_FIELD: usize = 2 * WORD_SIZE;

/// Rounds `size` up to the next multiple of [`WORD_SIZE`].
///
/// Returns `None` if the rounded value does not fit in `usize`.
///
/// # Examples
///
/// ```
/// use arena_pool::block::{WORD_SIZE, round_up};
///
/// assert_eq!(round_up(1), Some(WORD_SIZE));
/// assert_eq!(round_up(WORD_SIZE), Some(WORD_SIZE));
/// assert_eq!(round_up(WORD_SIZE + 1), Some(2 * WORD_SIZE));
/// assert_eq!(round_up(usize::MAX), None);
/// ```
#[must_use]
pub const fn round_up(size: usize) -> Option<usize> {
    size.checked_next_multiple_of(WORD_SIZE)
}

/// Returns the payload size reserved for a request of `size` bytes.
///
/// This is `size` rounded up to a word multiple, but at least
/// [`MIN_PAYLOAD_SIZE`].
///
/// # Examples
///
/// ```
/// use arena_pool::block::{MIN_PAYLOAD_SIZE, WORD_SIZE, payload_size};
///
/// assert_eq!(payload_size(1), Some(MIN_PAYLOAD_SIZE));
/// assert_eq!(payload_size(5 * WORD_SIZE - 1), Some(5 * WORD_SIZE));
/// ```
#[must_use]
pub const fn payload_size(size: usize) -> Option<usize> {
    match round_up(size) {
        Some(rounded) if rounded < MIN_PAYLOAD_SIZE => Some(MIN_PAYLOAD_SIZE),
        rounded => rounded,
    }
}

/// Word-granular view of the arena bytes.
///
/// Every access goes through an offset that is checked against the arena
/// length, so a corrupted link or size panics instead of touching memory
/// outside the arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArenaMemory {
    base: NonNull<u8>,
    len: usize,
}

impl ArenaMemory {
    /// Creates a view of `base..base + len`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `base` is aligned to [`WORD_SIZE`] and `len` is a multiple of it
    /// - the region `base..base + len` is valid for reads and writes
    /// - the region is not accessed by anything else while the view is used,
    ///   except through payload pointers handed out by the allocator
    pub(crate) unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        assert!(
            base.addr().get().is_multiple_of(WORD_SIZE),
            "arena base must be word aligned"
        );
        assert!(len.is_multiple_of(WORD_SIZE), "arena length must be word multiple");
        Self { base, len }
    }

    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn len(self) -> usize {
        self.len
    }

    #[expect(clippy::cast_ptr_alignment)]
    fn word_ptr(self, offset: usize) -> *mut usize {
        assert!(
            offset.is_multiple_of(WORD_SIZE) && offset < self.len,
            "word offset out of arena: offset={offset}, len={}",
            self.len
        );
        unsafe { self.base.as_ptr().add(offset).cast::<usize>() }
    }

    fn read_word(self, offset: usize) -> usize {
        unsafe { self.word_ptr(offset).read() }
    }

    fn write_word(self, offset: usize, value: usize) {
        unsafe { self.word_ptr(offset).write(value) }
    }

    pub(crate) fn block_size(self, block: usize) -> usize {
        self.read_word(block + SIZE_FIELD)
    }

    pub(crate) fn set_block_size(self, block: usize, size: usize) {
        self.write_word(block + SIZE_FIELD, size);
    }

    pub(crate) fn previous(self, block: usize) -> usize {
        self.read_word(block + PREVIOUS_FIELD)
    }

    pub(crate) fn set_previous(self, block: usize, previous: usize) {
        self.write_word(block + PREVIOUS_FIELD, previous);
    }

    pub(crate) fn next(self, block: usize) -> usize {
        self.read_word(block + NEXT_FIELD)
    }

    pub(crate) fn set_next(self, block: usize, next: usize) {
        self.write_word(block + NEXT_FIELD, next);
    }

    /// Returns the offset one past the last payload byte of `block`.
    pub(crate) fn block_end(self, block: usize) -> usize {
        block + HEADER_SIZE + self.block_size(block)
    }

    pub(crate) fn payload(self, block: usize) -> NonNull<u8> {
        assert!(block + HEADER_SIZE < self.len, "block out of arena: block={block}");
        unsafe { self.base.add(block + HEADER_SIZE) }
    }

    /// Recovers the header offset of the block whose payload starts at `ptr`.
    ///
    /// Returns `None` unless `ptr` lies inside the arena on a word boundary
    /// past the first header, and the recorded size keeps the block inside the
    /// arena.
    pub(crate) fn header_of(self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.base.as_ptr().addr())?;
        if offset >= self.len || !offset.is_multiple_of(WORD_SIZE) {
            return None;
        }
        let block = offset.checked_sub(HEADER_SIZE)?;
        let size = self.block_size(block);
        let end = offset.checked_add(size)?;
        (size.is_multiple_of(WORD_SIZE) && end <= self.len).then_some(block)
    }
}
