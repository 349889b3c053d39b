//! # void_stack - LIFO Stack Allocator
//!
//! A fixed-capacity allocator that carves blocks out of one contiguous
//! buffer in last-in-first-out order:
//!
//! ```text
//!   start                       top                              end
//!   ┌──────┬───┬──────┬───┬─────┬─────────────────────────────────┐
//!   │ hdr  │ A │ hdr  │ B │ ... │            free space           │
//!   └──────┴───┴──────┴───┴─────┴─────────────────────────────────┘
//!   allocate bumps `top` forward, free rewinds it, reset snaps it to start.
//! ```
//!
//! Two allocation modes are fixed at construction:
//! - [`AllocationMode::HeaderCarrying`]: each block is preceded by a small
//!   header recording how far to rewind on free. Any power-of-two alignment
//!   is accepted, and an extra `offset` aligns `ptr + offset` instead of `ptr`.
//! - [`AllocationMode::HeaderFree`]: zero per-block overhead, alignments are
//!   capped at the base alignment and no per-call alignment correction is done.
//!
//! The allocator manages bytes, not objects. Nothing stored in a freed or
//! reset block is ever dropped.

pub mod config;
pub mod error;
mod header;
pub mod stack;

use core::ptr::NonNull;

pub use config::{AllocationMode, StackConfig};
pub use error::{Result, StackError};
pub use stack::{StackAllocator, StackMarker, StackScope, StackStats};

/// Common interface for raw byte allocators
pub trait Allocator {
    /// Allocate `size` bytes aligned to `align`, or `None` when exhausted
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Return memory to the allocator
    ///
    /// # Safety
    /// The pointer must be null or have been returned by this allocator and
    /// not yet released.
    unsafe fn deallocate(&mut self, ptr: *mut u8);

    /// Reset the allocator, discarding all allocations
    fn reset(&mut self);

    /// Get the total capacity
    fn capacity(&self) -> usize;

    /// Get the currently used memory
    fn used(&self) -> usize;

    /// Get the available memory
    fn available(&self) -> usize {
        self.capacity() - self.used()
    }
}

/// Align a value up to the given alignment
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align a value up, returning `None` on overflow
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align a value down to the given alignment
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if a pointer is aligned
#[inline]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    (ptr as usize) & (align - 1) == 0
}

pub mod prelude {
    pub use crate::{Allocator, AllocationMode, StackAllocator, StackConfig, StackError};
    pub use crate::{align_up, align_down, checked_align_up, is_aligned};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(13, 4), 16);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(15, 8), 8);
        assert_eq!(align_down(16, 8), 16);
        assert_eq!(align_down(3, 4), 0);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(usize::MAX, 16), None);
        assert_eq!(checked_align_up(usize::MAX, 1), Some(usize::MAX));
        assert_eq!(checked_align_up(17, 16), Some(32));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(64 as *const u8, 32));
        assert!(!is_aligned(65 as *const u8, 2));
        assert!(is_aligned(65 as *const u8, 1));
    }
}
