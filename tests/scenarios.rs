//! Concrete scenarios from the spec's testable-properties list (scenarios
//! 1, 2 and 4): tiny round-trip, size-class boundary, and oversize bypass.
//!
//! Exercised through the public facade only (`allocator::{initialize,
//! allocate, deallocate}`), the way a consumer of this crate would.

use tcachealloc::allocator::{allocate, deallocate, initialize};
use tcachealloc::config::ALIGNMENT;
use tcachealloc::size_class;

#[test]
fn tiny_round_trip_is_lifo() {
    initialize();

    let p1 = allocate(1);
    assert!(!p1.is_null());
    assert_eq!(p1 as usize % ALIGNMENT, 0);
    unsafe { deallocate(p1, 1) };

    let p2 = allocate(1);
    assert_eq!(p1, p2, "freelist must hand back the most recently freed block");
    unsafe { deallocate(p2, 1) };
}

#[test]
fn size_class_boundary_matches_index_of() {
    initialize();

    // allocate(8), allocate(9), allocate(16) land in classes 0, 1, 1.
    assert_eq!(size_class::index_of(8), 0);
    assert_eq!(size_class::index_of(9), 1);
    assert_eq!(size_class::index_of(16), 1);

    let a = allocate(8);
    let b = allocate(9);
    let c = allocate(16);
    assert!(!a.is_null() && !b.is_null() && !c.is_null());

    // b and c are both class 1 (16-byte blocks); if they happen to land in
    // the same span they're exactly one block apart.
    let diff = (b as isize - c as isize).unsigned_abs();
    if diff < 4096 {
        assert_eq!(diff % 16, 0, "class-1 addresses must be 16-byte block multiples apart");
    }

    unsafe {
        deallocate(a, 8);
        deallocate(b, 9);
        deallocate(c, 16);
    }
}

#[test]
fn oversize_bypasses_tiers_and_round_trips() {
    initialize();

    let size = 300_000usize;
    let ptr = allocate(size);
    assert!(!ptr.is_null());
    unsafe {
        ptr.write_bytes(0x5A, size);
        for i in [0, size / 2, size - 1] {
            assert_eq!(*ptr.add(i), 0x5A);
        }
        deallocate(ptr, size);
    }
}

#[test]
fn zero_size_allocates_exactly_alignment_bytes() {
    initialize();

    let ptr = allocate(0);
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % ALIGNMENT, 0);
    unsafe {
        ptr.write_bytes(0, ALIGNMENT);
        deallocate(ptr, 0);
    }
}

#[test]
fn repeated_allocations_never_overlap() {
    initialize();

    let sizes = [8usize, 16, 32, 64, 128, 256, 4096, 300_000];
    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for &size in &sizes {
        for _ in 0..8 {
            let ptr = allocate(size);
            assert!(!ptr.is_null());
            unsafe { ptr.write_bytes((size % 256) as u8, size) };
            live.push((ptr, size));
        }
    }

    for &(ptr, size) in &live {
        for i in [0usize, size / 2, size - 1] {
            assert_eq!(unsafe { *ptr.add(i) }, (size % 256) as u8);
        }
    }

    for (ptr, size) in live {
        unsafe { deallocate(ptr, size) };
    }
}
