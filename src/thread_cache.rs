//! Thread Cache (front-end): per-thread free lists for lock-free allocation.
//!
//! Each thread gets its own `ThreadCache`. The fast path (list non-empty)
//! touches no shared state at all. Grounded on the teacher's `FreeList`
//! shape (intrusive singly-linked list plus a length counter) and its
//! `thread_local!`-backed per-thread singleton, but the adaptive sizing the
//! teacher inherits from gperftools — `max_length` slow-start, low-water-mark
//! scavenging, stealing budget from a shared `UNCLAIMED_CACHE_SPACE` pool —
//! is replaced with the fixed-threshold policy this design calls for: a
//! single `THREAD_HOLD` length cap per class, batch-returning a quarter of
//! the list at a time.
//!
//! `allocate`'s miss path fixes a defect present in
//! `original_source/v2/src/ThreadCache.cc`: that source decrements the
//! per-class length counter *before* checking whether the list was empty,
//! so a miss still counts as a pop. Here the counter is only touched on the
//! path that actually removes a node.

use crate::central_cache::CentralCache;
use crate::config::{NUM_SIZE_CLASSES, THREAD_HOLD};
use crate::page_cache::PageCache;
use crate::platform;
use crate::size_class;
use crate::span::FreeObject;
use crate::sync::SpinMutex;
use core::ptr;

/// Per-size-class free list within the thread cache.
struct FreeList {
    head: *mut FreeObject,
    length: u32,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            length: 0,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.length -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.length += 1;
    }
}

/// Refill batch size for a block of `size` bytes: `min(baseBatch(size), 4096/size)`,
/// capping a single refill at roughly one OS page's worth of memory
/// regardless of size class. `baseBatch` steps down by halves from 64 to 1
/// as `size` crosses 32, 64, 128, 256, 512 and 1024 bytes.
fn refill_batch(size: usize) -> usize {
    let base = if size <= 32 {
        64
    } else if size <= 64 {
        32
    } else if size <= 128 {
        16
    } else if size <= 256 {
        8
    } else if size <= 512 {
        4
    } else if size <= 1024 {
        2
    } else {
        1
    };
    base.min((4096 / size).max(1))
}

/// Per-thread cache holding free lists for each size class.
pub struct ThreadCache {
    lists: [FreeList; NUM_SIZE_CLASSES],
}

// SAFETY: a ThreadCache is only ever touched by the thread that owns it.
unsafe impl Send for ThreadCache {}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; NUM_SIZE_CLASSES],
        }
    }

    /// Allocate a block from size class `class`. Returns null if the
    /// central cache (and, beneath it, the page cache) can't supply one.
    ///
    /// # Safety
    ///
    /// `class` must be `< NUM_SIZE_CLASSES`. `central` and `page_cache`
    /// must be the global singletons.
    #[inline]
    pub unsafe fn allocate(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        let list = &mut self.lists[class];
        let obj = list.pop();
        if !obj.is_null() {
            return obj as *mut u8;
        }
        unsafe { self.refill(class, central, page_cache) }
    }

    /// Return a block to size class `class`'s free list, batch-returning to
    /// the central cache once the list grows past `THREAD_HOLD`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a prior `allocate(class, ..)` call
    /// and not already freed. `central` and `page_cache` must be the global
    /// singletons.
    #[inline]
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) {
        let list = &mut self.lists[class];
        list.push(ptr as *mut FreeObject);

        if list.length > THREAD_HOLD {
            unsafe { self.batch_return(class, central, page_cache) };
        }
    }

    /// Slow path: pull up to `refill_batch(size)` individual blocks from the
    /// central cache, one `fetchRange`-equivalent call at a time. The first
    /// block becomes the result; the rest seed this class's free list.
    #[cold]
    unsafe fn refill(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        let size = size_class::class_to_size(class);
        let batch = refill_batch(size);

        let result = unsafe { central.fetch_one(class, page_cache) };
        if result.is_null() {
            return ptr::null_mut();
        }

        let list = &mut self.lists[class];
        for _ in 1..batch {
            let obj = unsafe { central.fetch_one(class, page_cache) };
            if obj.is_null() {
                break;
            }
            list.push(obj);
        }

        result as *mut u8
    }

    /// Quarter-keep batch return: retain `ceil(length/4)` blocks locally,
    /// hand the rest back to the central cache as one chain.
    #[cold]
    unsafe fn batch_return(
        &mut self,
        class: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) {
        let list = &mut self.lists[class];
        let keep = list.length.div_ceil(4).max(1);
        if keep >= list.length {
            return;
        }

        let mut node = list.head;
        for _ in 1..keep {
            node = unsafe { (*node).next };
        }
        let tail = unsafe { (*node).next };
        unsafe { (*node).next = ptr::null_mut() };

        let returned = list.length - keep;
        list.length = keep;

        let size = size_class::class_to_size(class);
        unsafe {
            central.return_range(tail, returned as usize * size, class, page_cache, platform::now_ms());
        }
    }

    /// Flush every non-empty class back to the central cache. Called once,
    /// on thread exit.
    ///
    /// # Safety
    ///
    /// Must only be called once per `ThreadCache` lifetime.
    pub unsafe fn flush(&mut self, central: &CentralCache, page_cache: &SpinMutex<PageCache>) {
        let now = platform::now_ms();
        for class in 0..NUM_SIZE_CLASSES {
            let list = &mut self.lists[class];
            if list.head.is_null() {
                continue;
            }
            let size = size_class::class_to_size(class);
            let bytes = list.length as usize * size;
            let head = list.head;
            list.head = ptr::null_mut();
            list.length = 0;
            unsafe { central.return_range(head, bytes, class, page_cache, now) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env() -> (SpinMutex<PageCache>, CentralCache) {
        (SpinMutex::new(PageCache::new()), CentralCache::new())
    }

    #[test]
    fn allocate_and_deallocate_round_trips() {
        let (pc, central) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::index_of(16);

        unsafe {
            let ptr = tc.allocate(class, &central, &pc);
            assert!(!ptr.is_null());
            tc.deallocate(ptr, class, &central, &pc);
        }
    }

    #[test]
    fn reuses_from_local_list_before_hitting_central() {
        let (pc, central) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::index_of(32);

        unsafe {
            let a = tc.allocate(class, &central, &pc);
            tc.deallocate(a, class, &central, &pc);
            let b = tc.allocate(class, &central, &pc);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn batch_return_triggers_past_thread_hold() {
        let (pc, central) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::index_of(8);

        unsafe {
            let mut ptrs = alloc::vec::Vec::new();
            for _ in 0..(THREAD_HOLD as usize + 8) {
                let ptr = tc.allocate(class, &central, &pc);
                assert!(!ptr.is_null());
                ptrs.push(ptr);
            }
            for ptr in ptrs {
                tc.deallocate(ptr, class, &central, &pc);
            }
            // The list should have been trimmed down to roughly a quarter
            // of THREAD_HOLD at some point during these returns; we can't
            // observe `length` directly from outside, but a further
            // allocate/deallocate cycle should still work cleanly.
            let ptr = tc.allocate(class, &central, &pc);
            assert!(!ptr.is_null());
            tc.deallocate(ptr, class, &central, &pc);
        }
    }

    #[test]
    fn flush_returns_everything_to_central() {
        let (pc, central) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::index_of(48);

        unsafe {
            let ptr = tc.allocate(class, &central, &pc);
            tc.deallocate(ptr, class, &central, &pc);
            tc.flush(&central, &pc);
        }
    }
}
