//! Address-ordered doubly linked list of free blocks.
//!
//! The nodes live inside the arena itself: a free block's `previous` and
//! `next` links occupy the first two words of its payload. The list is
//! circular through a sentinel. The sentinel is not a block; its two links
//! are kept here, outside the arena, and [`SENTINEL`] is the offset value that
//! stands for it.
//!
//! ```text
//!        ┌──────────────────────────────────────────────────┐
//!        ▼                                                  │
//!   ┌──────────┐     ┌──────────┐     ┌──────────┐     ┌────┴─────┐
//!   │ sentinel │ ──▶ │ free @0  │ ──▶ │ free @96 │ ──▶ │ free @320│
//!   └──────────┘ ◀── └──────────┘ ◀── └──────────┘ ◀── └──────────┘
//! ```
//!
//! The list only maintains links. Keeping it sorted by address and free of
//! adjacent blocks is up to the caller.

use crate::block::ArenaMemory;

/// Offset value standing for the list sentinel.
pub(crate) const SENTINEL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    /// Sentinel's `next` link: the lowest free block.
    first: usize,
    /// Sentinel's `previous` link: the highest free block.
    last: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            first: SENTINEL,
            last: SENTINEL,
        }
    }

    pub(crate) fn next(&self, memory: ArenaMemory, node: usize) -> usize {
        if node == SENTINEL {
            self.first
        } else {
            memory.next(node)
        }
    }

    pub(crate) fn previous(&self, memory: ArenaMemory, node: usize) -> usize {
        if node == SENTINEL {
            self.last
        } else {
            memory.previous(node)
        }
    }

    fn set_next(&mut self, memory: ArenaMemory, node: usize, next: usize) {
        if node == SENTINEL {
            self.first = next;
        } else {
            memory.set_next(node, next);
        }
    }

    fn set_previous(&mut self, memory: ArenaMemory, node: usize, previous: usize) {
        if node == SENTINEL {
            self.last = previous;
        } else {
            memory.set_previous(node, previous);
        }
    }

    /// Links `node` into the list immediately before `anchor`.
    ///
    /// `anchor` may be [`SENTINEL`], which appends `node` at the tail.
    pub(crate) fn insert_before(&mut self, memory: ArenaMemory, node: usize, anchor: usize) {
        assert_ne!(node, SENTINEL, "sentinel cannot be inserted");
        let previous = self.previous(memory, anchor);
        memory.set_previous(node, previous);
        memory.set_next(node, anchor);
        self.set_previous(memory, anchor, node);
        self.set_next(memory, previous, node);
    }

    /// Moves the list position of `from` to `to`.
    ///
    /// The links of `from` are read before anything of `to` is written, so
    /// `to` may overlap the link words of `from`.
    pub(crate) fn replace(&mut self, memory: ArenaMemory, from: usize, to: usize) {
        assert_ne!(from, SENTINEL, "sentinel cannot be replaced");
        let previous = memory.previous(from);
        let next = memory.next(from);
        memory.set_previous(to, previous);
        memory.set_next(to, next);
        self.set_next(memory, previous, to);
        self.set_previous(memory, next, to);
    }

    /// Removes `node` from the list. Its own link words are left as they are.
    pub(crate) fn unlink(&mut self, memory: ArenaMemory, node: usize) {
        assert_ne!(node, SENTINEL, "sentinel cannot be unlinked");
        let previous = memory.previous(node);
        let next = memory.next(node);
        self.set_next(memory, previous, next);
        self.set_previous(memory, next, previous);
    }

    /// Iterates over the free blocks from the lowest address upwards.
    pub(crate) fn iter(&self, memory: ArenaMemory) -> Iter<'_> {
        Iter {
            list: self,
            memory,
            current: self.first,
        }
    }
}

pub(crate) struct Iter<'a> {
    list: &'a FreeList,
    memory: ArenaMemory,
    current: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == SENTINEL {
            return None;
        }
        let node = self.current;
        self.current = self.list.next(self.memory, node);
        Some(node)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{vec, vec::Vec};
    use core::ptr::NonNull;

    use super::*;
    use crate::block::WORD_SIZE;

    const W: usize = WORD_SIZE;

    fn with_list<F>(test_fn: F)
    where
        F: FnOnce(ArenaMemory, &mut FreeList),
    {
        let mut buffer: Vec<usize> = vec![0; 64];
        let base = NonNull::new(buffer.as_mut_ptr().cast::<u8>()).unwrap();
        let memory = unsafe { ArenaMemory::new(base, 64 * W) };
        let mut list = FreeList::new();
        test_fn(memory, &mut list);
    }

    fn nodes(list: &FreeList, memory: ArenaMemory) -> Vec<usize> {
        list.iter(memory).collect()
    }

    fn nodes_backward(list: &FreeList, memory: ArenaMemory) -> Vec<usize> {
        let mut out = Vec::new();
        let mut node = list.previous(memory, SENTINEL);
        while node != SENTINEL {
            out.push(node);
            node = list.previous(memory, node);
        }
        out
    }

    #[test]
    fn test_empty_list() {
        with_list(|memory, list| {
            assert!(nodes(list, memory).is_empty());
            assert!(nodes_backward(list, memory).is_empty());
        });
    }

    #[test]
    fn test_insert_before() {
        with_list(|memory, list| {
            list.insert_before(memory, 8 * W, SENTINEL);
            assert_eq!(nodes(list, memory), [8 * W]);
            list.insert_before(memory, 0, 8 * W);
            list.insert_before(memory, 16 * W, SENTINEL);
            list.insert_before(memory, 4 * W, 8 * W);

            assert_eq!(nodes(list, memory), [0, 4 * W, 8 * W, 16 * W]);
            assert_eq!(nodes_backward(list, memory), [16 * W, 8 * W, 4 * W, 0]);
        });
    }

    #[test]
    fn test_unlink() {
        with_list(|memory, list| {
            for node in [0, 4 * W, 8 * W] {
                list.insert_before(memory, node, SENTINEL);
            }

            list.unlink(memory, 4 * W);
            assert_eq!(nodes(list, memory), [0, 8 * W]);
            list.unlink(memory, 0);
            assert_eq!(nodes(list, memory), [8 * W]);
            assert_eq!(nodes_backward(list, memory), [8 * W]);
            list.unlink(memory, 8 * W);
            assert!(nodes(list, memory).is_empty());
        });
    }

    #[test]
    fn test_replace() {
        with_list(|memory, list| {
            for node in [0, 8 * W, 16 * W] {
                list.insert_before(memory, node, SENTINEL);
            }

            list.replace(memory, 8 * W, 10 * W);
            assert_eq!(nodes(list, memory), [0, 10 * W, 16 * W]);
            assert_eq!(nodes_backward(list, memory), [16 * W, 10 * W, 0]);
        });
    }

    #[test]
    fn test_replace_overlapping_links() {
        with_list(|memory, list| {
            list.insert_before(memory, 0, SENTINEL);
            list.insert_before(memory, 8 * W, SENTINEL);

            // the new node's header lands on the old node's `next` link
            list.replace(memory, 0, 2 * W);
            memory.set_block_size(2 * W, 3 * W);
            assert_eq!(nodes(list, memory), [2 * W, 8 * W]);
            assert_eq!(nodes_backward(list, memory), [8 * W, 2 * W]);
        });
    }
}
