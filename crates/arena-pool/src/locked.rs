//! Lock-protected arena usable as a global allocator.

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use log::error;
use spin::{Mutex, MutexGuard};

use crate::{ArenaAllocator, ArenaError, block::WORD_SIZE};

/// An [`ArenaAllocator`] behind a spin lock.
///
/// The engine itself assumes a single owner; this wrapper serializes every
/// call so the arena can back a `#[global_allocator]` static.
///
/// Only layouts aligned to at most [`WORD_SIZE`] are served. Larger
/// alignments get a null pointer.
///
/// ```rust,ignore
/// use arena_pool::LockedArena;
///
/// #[global_allocator]
/// static ALLOCATOR: LockedArena = LockedArena::new();
///
/// static mut HEAP: [usize; 4096] = [0; 4096];
///
/// fn init_heap() {
///     unsafe {
///         ALLOCATOR
///             .init((&raw mut HEAP).cast(), size_of::<[usize; 4096]>())
///             .unwrap();
///     }
/// }
/// ```
pub struct LockedArena {
    inner: Mutex<ArenaAllocator<'static>>,
}

impl Default for LockedArena {
    fn default() -> Self {
        Self::new()
    }
}

impl LockedArena {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ArenaAllocator::empty()),
        }
    }

    /// Hands `address..address + capacity` to the allocator.
    ///
    /// # Safety
    ///
    /// The region must stay valid and otherwise unused for the rest of the
    /// program, and no pointer from a previous arena may be in use.
    pub unsafe fn init(&self, address: *mut u8, capacity: usize) -> Result<(), ArenaError> {
        unsafe { self.inner.lock().init(address, capacity) }
    }

    /// Locks the allocator for direct use.
    pub fn lock(&self) -> MutexGuard<'_, ArenaAllocator<'static>> {
        self.inner.lock()
    }
}

unsafe impl GlobalAlloc for LockedArena {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }
        self.inner
            .lock()
            .allocate(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }
        self.inner
            .lock()
            .allocate_zeroed(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        if let Err(err) = unsafe { self.inner.lock().release(ptr) } {
            error!("dealloc failed: {err}");
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }
        let Some(ptr) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };
        unsafe { self.inner.lock().resize(ptr, new_size) }.map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{boxed::Box, vec};

    use super::*;

    fn leaked_arena(words: usize) -> (*mut u8, usize) {
        let heap = Box::leak(vec![0x5a5a_usize; words].into_boxed_slice());
        (heap.as_mut_ptr().cast(), words * WORD_SIZE)
    }

    fn with_locked_arena<F>(words: usize, test_fn: F)
    where
        F: FnOnce(&LockedArena),
    {
        let arena = LockedArena::new();
        let (start, len) = leaked_arena(words);
        unsafe { arena.init(start, len).unwrap() };
        test_fn(&arena);
    }

    #[test]
    fn test_uninitialized() {
        let arena = LockedArena::new();
        let layout = Layout::from_size_align(16, 8).unwrap();
        assert!(unsafe { arena.alloc(layout) }.is_null());
        assert!(!arena.lock().is_initialized());
    }

    #[test]
    fn test_alloc_dealloc() {
        with_locked_arena(128, |arena| unsafe {
            let layout = Layout::array::<u32>(10).unwrap();
            let ptr = arena.alloc(layout);
            assert!(!ptr.is_null());
            assert!(ptr.addr().is_multiple_of(layout.align()));

            let values = ptr.cast::<u32>();
            for i in 0..10 {
                values.add(i).write(u32::try_from(i).unwrap());
            }
            for i in 0..10 {
                assert_eq!(values.add(i).read(), u32::try_from(i).unwrap());
            }

            arena.dealloc(ptr, layout);
            let guard = arena.lock();
            assert_eq!(guard.free_blocks().count(), 1);
            assert_eq!(guard.free_space(), guard.capacity());
        });
    }

    #[test]
    fn test_alloc_zeroed() {
        with_locked_arena(64, |arena| unsafe {
            let layout = Layout::from_size_align(24, 8).unwrap();
            let ptr = arena.alloc_zeroed(layout);
            assert!(!ptr.is_null());
            for i in 0..24 {
                assert_eq!(ptr.add(i).read(), 0);
            }
            arena.dealloc(ptr, layout);
        });
    }

    #[test]
    fn test_realloc() {
        with_locked_arena(128, |arena| unsafe {
            let layout = Layout::from_size_align(8, 8).unwrap();
            let ptr = arena.alloc(layout);
            ptr.cast::<u64>().write(0x0123_4567_89ab_cdef);

            let grown = arena.realloc(ptr, layout, 64);
            assert!(!grown.is_null());
            assert_eq!(grown.cast::<u64>().read(), 0x0123_4567_89ab_cdef);

            let grown_layout = Layout::from_size_align(64, 8).unwrap();
            assert!(arena.realloc(grown, grown_layout, 4096).is_null());
            assert_eq!(grown.cast::<u64>().read(), 0x0123_4567_89ab_cdef);

            arena.dealloc(grown, grown_layout);
        });
    }

    #[test]
    fn test_large_alignment_refused() {
        with_locked_arena(128, |arena| unsafe {
            let layout = Layout::from_size_align(32, 64).unwrap();
            assert!(arena.alloc(layout).is_null());
            assert!(arena.alloc_zeroed(layout).is_null());
        });
    }

    #[test]
    fn test_dealloc_foreign_pointer_is_ignored() {
        with_locked_arena(64, |arena| unsafe {
            let before = arena.lock().free_space();
            let mut outside = 0_u64;
            let layout = Layout::new::<u64>();
            arena.dealloc((&raw mut outside).cast(), layout);
            arena.dealloc(ptr::null_mut(), layout);
            assert_eq!(arena.lock().free_space(), before);
        });
    }

    #[test]
    fn test_shared_between_threads() {
        extern crate std;

        use std::thread;

        static ARENA: LockedArena = LockedArena::new();
        let (start, len) = leaked_arena(4096);
        unsafe { ARENA.init(start, len).unwrap() };

        let handles = (0..4_u8)
            .map(|id| {
                thread::spawn(move || {
                    let layout = Layout::from_size_align(48, 8).unwrap();
                    for _ in 0..100 {
                        unsafe {
                            let ptr = ARENA.alloc(layout);
                            assert!(!ptr.is_null());
                            ptr.write_bytes(id, 48);
                            for i in 0..48 {
                                assert_eq!(ptr.add(i).read(), id);
                            }
                            ARENA.dealloc(ptr, layout);
                        }
                    }
                })
            })
            .collect::<alloc::vec::Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let guard = ARENA.lock();
        assert_eq!(guard.free_blocks().count(), 1);
        assert_eq!(guard.free_space(), guard.capacity());
    }
}
