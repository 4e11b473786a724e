#![no_std]

//! tcachealloc: a concurrent, tcmalloc-style three-tier allocator for small
//! objects.
//!
//! Three tiers, leaves-first:
//! - [`page_cache`]: the backing singleton. Obtains page-aligned spans from
//!   the OS and reclaims/coalesces them on return.
//! - [`central_cache`]: per-size-class shared object pools, carved from
//!   spans obtained from the page cache, with delayed span reclamation.
//! - [`thread_cache`]: per-thread free lists, the lock-free fast path.
//!
//! [`allocator`] is the front facade tying all three together: `initialize`,
//! `allocate`, `deallocate`. This is a library, not a `#[global_allocator]`
//! — callers track their own sizes and pass them back to `deallocate`.
//!
//! # Usage
//!
//! ```ignore
//! tcachealloc::allocator::initialize();
//! let ptr = tcachealloc::allocator::allocate(64);
//! unsafe { tcachealloc::allocator::deallocate(ptr, 64) };
//! ```

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod central_cache;
pub mod config;
#[macro_use]
pub mod macros;
pub mod page_cache;
pub mod platform;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{allocate, deallocate, initialize};
