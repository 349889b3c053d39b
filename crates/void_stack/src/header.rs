//! Per-block header used by header-carrying stacks

use core::mem;

/// Record placed immediately before every user pointer in
/// [`AllocationMode::HeaderCarrying`](crate::AllocationMode::HeaderCarrying)
///
/// `adjustment` is the byte distance from the user pointer back to the top
/// of stack as it was before the block was allocated.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AllocationHeader {
    pub(crate) adjustment: usize,
}

/// Bytes reserved in front of each header-carrying block
pub(crate) const HEADER_SIZE: usize = mem::size_of::<AllocationHeader>();

impl AllocationHeader {
    /// Write a header at `at`
    ///
    /// # Safety
    /// `at..at + HEADER_SIZE` must be writable. No alignment is required.
    #[inline]
    pub(crate) unsafe fn write(at: *mut u8, adjustment: usize) {
        unsafe { (at as *mut AllocationHeader).write_unaligned(AllocationHeader { adjustment }) }
    }

    /// Read the header that precedes `user`
    ///
    /// # Safety
    /// `user` must have been returned by a header-carrying allocation whose
    /// header has not been overwritten.
    #[inline]
    pub(crate) unsafe fn read_before(user: *const u8) -> AllocationHeader {
        unsafe { (user.sub(HEADER_SIZE) as *const AllocationHeader).read_unaligned() }
    }
}
