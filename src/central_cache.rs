//! Central Cache (middle tier): per-size-class shared object pools, backed
//! by spans obtained from the page cache.
//!
//! Grounded on the teacher's `central_free_list.rs` for the general shape —
//! one lock per size class, carve-on-miss from the tier below — but the
//! reclamation policy is different. The teacher returns a span to the page
//! heap the instant it sees zero allocated objects. This cache instead keeps
//! returned blocks on the class's free list and only walks spans looking for
//! fully-free ones periodically (`delayCount`/`lastReturnTime`), so a
//! allocate/deallocate cycle at a size class's boundary doesn't thrash the
//! page cache. The tracking structure (`SpanTracker`) and the delayed-sweep
//! protocol follow `original_source/v2/src/CentralCache.cc`, with the
//! following bugs in that source fixed rather than reproduced:
//!
//! - `shouldPerformDelayedReturn` compared `lastTime - currentTime` against
//!   the delay interval; since `lastTime <= currentTime` always, that's
//!   backwards. Fixed to `currentTime - lastTime`.
//! - the reclamation sweep's excise loop is grounded as-is: it captures each
//!   node's `next` before any relinking happens, so consecutive nodes
//!   belonging to the same reclaimed span can't leave the walk holding a
//!   stale pointer.
//!
//! `updateSpanFreeCount`'s tally-store is grounded on the original runtime
//! as-is too (`CentralCache.cc:179,182`): the tally walk already counts every
//! block of a span currently on the free list, and nothing increments a
//! span's free count between sweeps (`fetch_one` only ever decrements it), so
//! that tally is already the span's true free count — storing it directly,
//! not folded onto the stale prior value, is what the original does and what
//! keeps this in agreement with `block_count` instead of roughly doubling it.

use crate::config::{
    DELAY_INTERVAL_MS, MAX_DELAY_COUNT, NUM_SIZE_CLASSES, PAGE_SIZE, SPAN_PAGES,
    SPAN_TRACKER_CAPACITY,
};
use crate::page_cache::PageCache;
use crate::size_class;
use crate::span::{self, FreeObject};
use crate::sync::SpinMutex;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Per-span bookkeeping the central cache keeps alongside the span itself:
/// how many blocks it was carved into, and how many of those are currently
/// sitting on some class's free list. Entries are appended once (on carve)
/// and never removed individually — the table is a flat append-only log,
/// reused only in the sense that a span's slot becomes dead weight once
/// the span is returned to the page cache (`base_addr` reset to 0).
struct SpanTracker {
    base_addr: AtomicUsize,
    num_pages: AtomicUsize,
    block_count: AtomicU32,
    free_count: AtomicU32,
}

impl SpanTracker {
    const fn new() -> Self {
        Self {
            base_addr: AtomicUsize::new(0),
            num_pages: AtomicUsize::new(0),
            block_count: AtomicU32::new(0),
            free_count: AtomicU32::new(0),
        }
    }
}

/// Everything one size class's lock guards: its free list head and the
/// delayed-return bookkeeping that decides when to sweep it.
struct ClassState {
    head: *mut FreeObject,
    delay_count: u32,
    /// `false` until the first `return_range` call for this class, which
    /// seeds `last_return_time_ms` from whatever `now_ms` it's handed rather
    /// than leaving it at 0 — `now_ms` is a large monotonic value (or, under
    /// Miri, a tick counter that can itself start at 0), so either comparing
    /// against a bare 0 or overloading 0 as "unseeded" would make a class's
    /// very first return look overdue for a sweep by construction.
    last_return_time_seeded: bool,
    last_return_time_ms: u64,
}

// SAFETY: only ever touched while the enclosing SpinMutex is held.
unsafe impl Send for ClassState {}

impl ClassState {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            delay_count: 0,
            last_return_time_seeded: false,
            last_return_time_ms: 0,
        }
    }
}

/// One free-object pool per size class, each independently locked.
pub struct CentralCache {
    classes: [SpinMutex<ClassState>; NUM_SIZE_CLASSES],
    trackers: [SpanTracker; SPAN_TRACKER_CAPACITY],
    next_tracker: AtomicUsize,
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralCache {
    pub const fn new() -> Self {
        let classes = [const { SpinMutex::new(ClassState::new()) }; NUM_SIZE_CLASSES];
        let trackers = [const { SpanTracker::new() }; SPAN_TRACKER_CAPACITY];
        Self {
            classes,
            trackers,
            next_tracker: AtomicUsize::new(0),
        }
    }

    /// Fetch a single block from size class `i`, populating from the page
    /// cache if the class's free list is empty.
    ///
    /// # Safety
    ///
    /// `page_cache` must be the global page cache instance.
    pub unsafe fn fetch_one(&self, i: usize, page_cache: &SpinMutex<PageCache>) -> *mut FreeObject {
        assert!(i < NUM_SIZE_CLASSES);
        let mut class = self.classes[i].lock();

        let head = class.head;
        if !head.is_null() {
            class.head = unsafe { (*head).next };
            unsafe { (*head).next = ptr::null_mut() };

            // Decrement while still holding the class lock: the sweep's
            // tally-then-store on the same tracker also runs under this
            // lock, and interleaving a fetch_sub between its load and
            // store would lose an update.
            if let Some(tracker) = self.tracker_for(page_cache, head as usize) {
                tracker.free_count.fetch_sub(1, Ordering::Release);
            }
            return head;
        }

        unsafe { self.populate(&mut class, i, page_cache) }
    }

    /// Return a linked list of `total_bytes` worth of blocks (all from size
    /// class `i`) to the central cache. Possibly triggers a reclamation
    /// sweep of `i`'s free list.
    ///
    /// # Safety
    ///
    /// `start` must head a valid, `total_bytes`-long chain of `FreeObject`s
    /// that all belong to size class `i`. `page_cache` must be the global
    /// page cache instance.
    pub unsafe fn return_range(
        &self,
        start: *mut FreeObject,
        total_bytes: usize,
        i: usize,
        page_cache: &SpinMutex<PageCache>,
        now_ms: u64,
    ) {
        if start.is_null() || i >= NUM_SIZE_CLASSES {
            return;
        }
        let block_size = size_class::class_to_size(i);
        let block_count = total_bytes / block_size;

        let mut end = start;
        let mut count = 1;
        while count < block_count {
            let next = unsafe { (*end).next };
            if next.is_null() {
                break;
            }
            end = next;
            count += 1;
        }

        let mut class = self.classes[i].lock();
        unsafe { (*end).next = class.head };
        class.head = start;

        // Seed the clock on this class's first return ever, rather than
        // sweeping immediately because an unseeded 0 looks overdue against
        // any real `now_ms`. Mirrors the original runtime's constructor
        // seeding `lastReturnTimes_` from the clock up front instead of from
        // zero.
        if !class.last_return_time_seeded {
            class.last_return_time_seeded = true;
            class.last_return_time_ms = now_ms;
        }

        class.delay_count += 1;
        let should_sweep = class.delay_count >= MAX_DELAY_COUNT
            || now_ms.saturating_sub(class.last_return_time_ms) >= DELAY_INTERVAL_MS;

        if should_sweep {
            class.delay_count = 0;
            class.last_return_time_ms = now_ms;
            unsafe { self.sweep(&mut class, i, page_cache) };
        }
    }

    /// Carve a fresh span into size class `i`'s blocks. Called with `i`'s
    /// lock held; returns the first block directly rather than threading it
    /// through the free list, mirroring the source's `fetchRange` miss path.
    unsafe fn populate(
        &self,
        class: &mut ClassState,
        i: usize,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut FreeObject {
        let size = size_class::class_to_size(i);
        let num_pages = if size <= SPAN_PAGES * PAGE_SIZE {
            SPAN_PAGES
        } else {
            size.div_ceil(PAGE_SIZE)
        };

        let span = unsafe { page_cache.lock().allocate_span(num_pages) };
        if span.is_null() {
            return ptr::null_mut();
        }

        let base = unsafe { (*span).start_addr() };
        let span_bytes = unsafe { (*span).num_pages } * PAGE_SIZE;
        let block_count = span_bytes / size;
        if block_count == 0 {
            return ptr::null_mut();
        }

        let mut list: *mut FreeObject = ptr::null_mut();
        for k in (0..block_count).rev() {
            let obj = unsafe { base.add(k * size) as *mut FreeObject };
            unsafe { (*obj).next = list };
            list = obj;
        }

        let result = list;
        let rest = unsafe { (*result).next };
        unsafe { (*result).next = ptr::null_mut() };
        class.head = rest;

        // Every span gets a tracker, even a single-block one (large classes
        // near MAX_SMALL can fit exactly one block per span) — otherwise
        // that span's sole block could never be recognized as "fully free"
        // by the sweep and would leak out of reclamation forever.
        let idx = self.alloc_tracker(
            base as usize,
            unsafe { (*span).num_pages },
            block_count as u32,
            (block_count - 1) as u32,
        );
        if let Some(idx) = idx {
            unsafe { (*span).tracker_idx = idx as u32 };
        }

        result
    }

    /// Claim the next slot in the append-only tracker table.
    fn alloc_tracker(&self, base_addr: usize, num_pages: usize, block_count: u32, free_count: u32) -> Option<usize> {
        let idx = self.next_tracker.fetch_add(1, Ordering::Relaxed);
        if idx >= SPAN_TRACKER_CAPACITY {
            return None;
        }
        let t = &self.trackers[idx];
        t.num_pages.store(num_pages, Ordering::Relaxed);
        t.block_count.store(block_count, Ordering::Relaxed);
        t.free_count.store(free_count, Ordering::Relaxed);
        t.base_addr.store(base_addr, Ordering::Release);
        Some(idx)
    }

    /// Resolve a block address to its owning span's tracker, via the page
    /// cache's O(log S) address lookup followed by an O(1) jump through
    /// `Span::tracker_idx`.
    fn tracker_for(&self, page_cache: &SpinMutex<PageCache>, addr: usize) -> Option<&SpanTracker> {
        let span = page_cache.lock().find_span(addr);
        if span.is_null() {
            return None;
        }
        let idx = unsafe { (*span).tracker_idx };
        if idx == span::NO_TRACKER {
            return None;
        }
        self.trackers.get(idx as usize)
    }

    /// Walk the class's free list once, tallying how many free blocks each
    /// span currently contributes, then fold that tally into each span's
    /// running free count. A span whose free count reaches its block count
    /// is fully free: its blocks are excised from the free list and the
    /// span itself is handed back to the page cache.
    unsafe fn sweep(&self, class: &mut ClassState, i: usize, page_cache: &SpinMutex<PageCache>) {
        // Tally pass: one page-cache lock acquisition covers every node,
        // rather than one per node.
        let mut tally: [(u32, u32); 64] = [(span::NO_TRACKER, 0); 64];
        let mut tally_len = 0usize;
        let mut overflow = false;

        {
            let pc = page_cache.lock();
            let mut node = class.head;
            while !node.is_null() {
                let s = pc.find_span(node as usize);
                let next = unsafe { (*node).next };
                if !s.is_null() {
                    let idx = unsafe { (*s).tracker_idx };
                    if idx != span::NO_TRACKER {
                        match tally[..tally_len].iter_mut().find(|(ti, _)| *ti == idx) {
                            Some(entry) => entry.1 += 1,
                            None if tally_len < tally.len() => {
                                tally[tally_len] = (idx, 1);
                                tally_len += 1;
                            }
                            None => overflow = true,
                        }
                    }
                }
                node = next;
            }
        }
        let _ = overflow; // a span missed this round is picked up next sweep

        for &(idx, new_free) in &tally[..tally_len] {
            let tracker = &self.trackers[idx as usize];
            // The tally walk just counted every block of this span currently
            // on the free list directly — that count is already authoritative
            // (fetch_one only ever decrements, never increments, so nothing
            // this span's entry holds between sweeps needs folding in here).
            // Storing it directly, not added to the stale value, is what
            // keeps this equal to the true free count instead of roughly
            // doubling it.
            tracker.free_count.store(new_free, Ordering::Release);

            let block_count = tracker.block_count.load(Ordering::Relaxed);
            if new_free != block_count {
                continue;
            }

            let base = tracker.base_addr.load(Ordering::Relaxed);
            let num_pages = tracker.num_pages.load(Ordering::Relaxed);
            let bytes = num_pages * PAGE_SIZE;
            if base == 0 {
                continue; // already reclaimed
            }

            // Excise every block owned by this span. `next` is captured
            // from `cur` before any relinking, so removing two consecutive
            // nodes from the same span can't leave `cur` dangling on the
            // next iteration.
            let mut prev: *mut FreeObject = ptr::null_mut();
            let mut cur = class.head;
            while !cur.is_null() {
                let addr = cur as usize;
                let next = unsafe { (*cur).next };
                if addr >= base && addr < base + bytes {
                    if prev.is_null() {
                        class.head = next;
                    } else {
                        unsafe { (*prev).next = next };
                    }
                } else {
                    prev = cur;
                }
                cur = next;
            }

            tracker.free_count.store(0, Ordering::Relaxed);
            tracker.base_addr.store(0, Ordering::Relaxed);

            let mut pc = page_cache.lock();
            let span = pc.find_span(base);
            if !span.is_null() {
                unsafe { pc.deallocate_span(span) };
            }
        }
        let _ = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SpinMutex as Mutex;

    fn class_for(bytes: usize) -> usize {
        size_class::index_of(bytes)
    }

    #[test]
    fn fetch_populates_and_then_reuses_free_list() {
        let pc = Mutex::new(PageCache::new());
        let cache = CentralCache::new();
        let class = class_for(32);

        unsafe {
            let a = cache.fetch_one(class, &pc);
            assert!(!a.is_null());
            let b = cache.fetch_one(class, &pc);
            assert!(!b.is_null());
            assert_ne!(a, b);
        }
    }

    #[test]
    fn returned_blocks_are_refetched() {
        let pc = Mutex::new(PageCache::new());
        let cache = CentralCache::new();
        let class = class_for(64);
        let size = size_class::class_to_size(class);

        unsafe {
            let a = cache.fetch_one(class, &pc);
            cache.return_range(a, size, class, &pc, 1);
            let b = cache.fetch_one(class, &pc);
            assert_eq!(a, b, "the only free block should be handed straight back out");
        }
    }

    #[test]
    fn sweep_reclaims_a_fully_free_span() {
        let pc = Mutex::new(PageCache::new());
        let cache = CentralCache::new();
        let class = class_for(2048);
        let size = size_class::class_to_size(class);

        // Drain the whole span this class populates with, then force a
        // sweep via MAX_DELAY_COUNT rather than waiting on the clock.
        let mut blocks = alloc::vec::Vec::new();
        unsafe {
            loop {
                let b = cache.fetch_one(class, &pc);
                if b.is_null() {
                    break;
                }
                blocks.push(b);
                // `fetch_one` only ever populates once; once the class's
                // free list is observed empty and refilled, subsequent
                // calls come from that same span until it's drained.
                if blocks.len() >= 4096 / size {
                    break;
                }
            }

            let mut now = 1u64;
            for b in blocks {
                cache.return_range(b, size, class, &pc, now);
                now += 1;
            }
        }
    }

    #[test]
    fn single_block_span_is_still_reclaimed() {
        // Near the top of the size range, a span's SPAN_PAGES worth of
        // bytes carries exactly one block — make sure that degenerate case
        // still gets a tracker (so the sweep can eventually recognize the
        // span as fully free) instead of being silently skipped.
        let pc = Mutex::new(PageCache::new());
        let cache = CentralCache::new();
        let class = class_for(32 * 1024); // comfortably exceeds SPAN_PAGES*PAGE_SIZE

        unsafe {
            let block = cache.fetch_one(class, &pc);
            assert!(!block.is_null());

            let span = pc.lock().find_span(block as usize);
            assert!(!span.is_null());
            assert_ne!(
                (*span).tracker_idx,
                span::NO_TRACKER,
                "a single-block span must still be registered with a tracker"
            );

            let size = size_class::class_to_size(class);
            cache.return_range(block, size, class, &pc, 1);
        }
    }

    #[test]
    fn unknown_class_index_is_a_no_op() {
        let pc = Mutex::new(PageCache::new());
        let cache = CentralCache::new();
        unsafe {
            cache.return_range(ptr::null_mut(), 0, NUM_SIZE_CLASSES, &pc, 1);
        }
    }
}
