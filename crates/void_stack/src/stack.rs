//! Stack allocator - LIFO allocation from a fixed buffer

use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use std::alloc::{self, Layout};

use crate::config::{AllocationMode, StackConfig};
use crate::error::{Result, StackError};
use crate::header::{AllocationHeader, HEADER_SIZE};
use crate::{checked_align_up, Allocator};

/// Bytes reserved in front of arrays allocated with
/// [`StackAllocator::alloc_array_with_len`]
const ARRAY_PREFIX: usize = mem::size_of::<usize>();

/// Counters describing how a stack has been used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackStats {
    /// Successful allocations
    pub allocations: u64,
    /// Calls to `free` with a non-null pointer
    pub frees: u64,
    /// Allocations rejected because the stack was full
    pub failed_allocations: u64,
    /// Calls to `reset`
    pub resets: u64,
    /// Highest value `used()` has reached
    pub peak_used: usize,
}

/// Stack allocator - LIFO allocation from one contiguous buffer
///
/// Blocks are handed out by bumping a top-of-stack cursor and released by
/// rewinding it. Freeing anything other than the most recent live block
/// rewinds past every block allocated after it: those blocks silently become
/// free space. Nothing is ever dropped; the stack manages bytes only.
///
/// All offsets are relative to the pointer returned by the memory provider.
/// `start <= top <= end` holds at all times.
pub struct StackAllocator {
    /// Pointer returned by the memory provider, released on drop
    raw: NonNull<u8>,
    /// Layout `raw` was acquired with
    layout: Layout,
    /// First offset satisfying the base alignment
    start: usize,
    /// One past the last usable offset
    end: usize,
    /// Offset of the next allocation
    top: usize,
    base_alignment: usize,
    mode: AllocationMode,
    stats: StackStats,
}

impl StackAllocator {
    /// Create a stack of `capacity` usable bytes whose first address is
    /// aligned to `base_alignment`
    ///
    /// Acquires `capacity + base_alignment - 1` bytes from the system
    /// allocator so that any misalignment of the returned pointer can be
    /// absorbed.
    pub fn new(capacity: usize, base_alignment: usize, mode: AllocationMode) -> Result<Self> {
        Self::from_config(&StackConfig {
            capacity,
            base_alignment,
            mode,
        })
    }

    /// Create a header-carrying stack with word base alignment
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::from_config(&StackConfig::new(capacity))
    }

    /// Create a stack from a validated config
    pub fn from_config(config: &StackConfig) -> Result<Self> {
        config.validate()?;

        let overflow = || StackError::CapacityOverflow {
            capacity: config.capacity,
            alignment: config.base_alignment,
        };
        let padded = config.padded_size().ok_or_else(overflow)?;
        let layout = Layout::from_size_align(padded, 1).map_err(|_| overflow())?;

        // Safety: layout size is at least `capacity`, which is non-zero
        let raw = NonNull::new(unsafe { alloc::alloc(layout) })
            .ok_or(StackError::OutOfMemory { requested: padded })?;

        let addr = raw.as_ptr() as usize;
        // `addr + padded` fits in the address space, so rounding up cannot overflow
        let start = crate::align_up(addr, config.base_alignment) - addr;
        let end = start + config.capacity;

        log::debug!(
            "Created stack allocator: {} bytes at {:p} (base align {}, {:?})",
            config.capacity,
            raw.as_ptr().wrapping_add(start),
            config.base_alignment,
            config.mode,
        );

        Ok(Self {
            raw,
            layout,
            start,
            end,
            top: start,
            base_alignment: config.base_alignment,
            mode: config.mode,
            stats: StackStats::default(),
        })
    }

    /// Allocate `size` bytes aligned to `alignment`
    ///
    /// Returns `None` when the stack cannot fit the block; the stack is left
    /// untouched in that case.
    ///
    /// # Panics
    /// If `alignment` is not a power of two, or exceeds the base alignment
    /// of a [`AllocationMode::HeaderFree`] stack.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.allocate_with_offset(size, alignment, 0)
    }

    /// Allocate `size` bytes such that `ptr + offset` is aligned to `alignment`
    ///
    /// The offset lets a caller place a prefix (such as an element count)
    /// in front of aligned data. It is ignored by header-free stacks.
    ///
    /// # Panics
    /// Same contract as [`allocate`](Self::allocate).
    pub fn allocate_with_offset(
        &mut self,
        size: usize,
        alignment: usize,
        offset: usize,
    ) -> Option<NonNull<u8>> {
        assert!(
            alignment.is_power_of_two(),
            "alignment {} is not a power of two",
            alignment
        );

        let result = match self.mode {
            AllocationMode::HeaderCarrying => self.allocate_with_header(size, alignment, offset),
            AllocationMode::HeaderFree => self.allocate_header_free(size, alignment),
        };

        match result {
            Some(ptr) => {
                self.stats.allocations += 1;
                self.stats.peak_used = self.stats.peak_used.max(self.used());
                log::trace!(
                    "Allocated {} bytes at {:p} (align {}, offset {})",
                    size,
                    ptr.as_ptr(),
                    alignment,
                    offset
                );
            }
            None => {
                self.stats.failed_allocations += 1;
                log::debug!(
                    "Stack exhausted: {} bytes (align {}) requested, {} of {} available",
                    size,
                    alignment,
                    self.available(),
                    self.capacity()
                );
            }
        }

        result
    }

    /// Header-free path: hand out `top` as-is and bump it
    ///
    /// The returned pointer is only aligned if `top` has stayed a multiple of
    /// `alignment`, i.e. every earlier size was a multiple of it.
    fn allocate_header_free(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        assert!(
            alignment <= self.base_alignment,
            "alignment {} exceeds base alignment {} of a header-free stack",
            alignment,
            self.base_alignment
        );

        let new_top = self.top.checked_add(size).filter(|&top| top <= self.end)?;
        let user = self.ptr_at(self.top);
        self.top = new_top;
        Some(user)
    }

    /// Header-carrying path
    ///
    /// The header is placed so that the user pointer that follows it lands
    /// `offset` bytes before an `alignment` boundary.
    fn allocate_with_header(
        &mut self,
        size: usize,
        alignment: usize,
        offset: usize,
    ) -> Option<NonNull<u8>> {
        let total = size.checked_add(HEADER_SIZE)?;
        let lead = HEADER_SIZE.checked_add(offset)?;

        let base = self.base_addr();
        let top_addr = base + self.top;
        let header_addr = checked_align_up(top_addr.checked_add(lead)?, alignment)? - lead;

        let header = header_addr - base;
        let new_top = header.checked_add(total).filter(|&top| top <= self.end)?;
        let user = header + HEADER_SIZE;

        // Safety: header..new_top lies inside start..end
        unsafe {
            AllocationHeader::write(self.raw.as_ptr().add(header), user - self.top);
        }

        self.top = new_top;
        Some(self.ptr_at(user))
    }

    /// Rewind the top of stack to where it was before `ptr` was allocated
    ///
    /// Every block allocated after `ptr` is discarded along with it; no
    /// ordering check is made. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer returned by `allocate` on this stack
    /// that lies at or below the current top. In header-carrying mode the
    /// header in front of `ptr` must not have been overwritten.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        debug_assert!(self.contains(ptr), "pointer {:p} does not belong to this stack", ptr);

        let user = ptr as usize - self.base_addr();
        let top = match self.mode {
            AllocationMode::HeaderCarrying => {
                let header = unsafe { AllocationHeader::read_before(ptr) };
                user - header.adjustment
            }
            AllocationMode::HeaderFree => user,
        };
        debug_assert!(
            self.start <= top && top <= self.end,
            "corrupt allocation header in front of {:p}",
            ptr
        );

        log::trace!("Freed {:p}, stack rewound by {} bytes", ptr, self.top.saturating_sub(top));
        self.top = top;
        self.stats.frees += 1;
    }

    /// Discard every allocation at once
    pub fn reset(&mut self) {
        log::debug!("Reset stack allocator ({} bytes discarded)", self.used());
        self.top = self.start;
        self.stats.resets += 1;
    }

    /// Allocate uninitialised storage for `count` values of `T`
    ///
    /// # Panics
    /// On a header-free stack whose base alignment is weaker than `T`'s.
    pub fn alloc_aligned<T>(&mut self, count: usize) -> Option<NonNull<T>> {
        let size = mem::size_of::<T>().checked_mul(count)?;
        self.allocate(size, mem::align_of::<T>()).map(NonNull::cast)
    }

    /// Copy a value onto the stack
    ///
    /// `T: Copy` keeps types with destructors out, since the stack never
    /// drops what it holds.
    pub fn push<T: Copy>(&mut self, value: T) -> Option<NonNull<T>> {
        let ptr = self.alloc_aligned::<T>(1)?;
        // Safety: freshly allocated, size_of::<T>() bytes
        unsafe { ptr.as_ptr().write_unaligned(value) };
        Some(ptr)
    }

    /// Copy a slice onto the stack
    pub fn alloc_slice<T: Copy>(&mut self, values: &[T]) -> Option<NonNull<[T]>> {
        let ptr = self.alloc_aligned::<T>(values.len())?;
        // Safety: freshly allocated, size_of_val(values) bytes, cannot overlap
        unsafe {
            ptr::copy_nonoverlapping(
                values.as_ptr() as *const u8,
                ptr.as_ptr() as *mut u8,
                mem::size_of_val(values),
            );
        }
        Some(NonNull::slice_from_raw_parts(ptr, values.len()))
    }

    /// Allocate `count` values of `T` preceded by a length prefix
    ///
    /// The element pointer is aligned for `T`; the `usize` count sits in the
    /// bytes immediately before it. Read it back with
    /// [`array_len`](Self::array_len) and release with
    /// [`free_array`](Self::free_array).
    ///
    /// # Panics
    /// On a header-free stack, which cannot honour an alignment offset.
    pub fn alloc_array_with_len<T>(&mut self, count: usize) -> Option<NonNull<T>> {
        assert!(
            self.mode.carries_header(),
            "length-prefixed arrays need a header-carrying stack"
        );

        let size = mem::size_of::<T>()
            .checked_mul(count)?
            .checked_add(ARRAY_PREFIX)?;
        let prefix = self.allocate_with_offset(size, mem::align_of::<T>(), ARRAY_PREFIX)?;

        // Safety: the block is at least ARRAY_PREFIX bytes long
        unsafe {
            (prefix.as_ptr() as *mut usize).write_unaligned(count);
            Some(NonNull::new_unchecked(prefix.as_ptr().add(ARRAY_PREFIX)).cast())
        }
    }

    /// Element count stored in front of an array
    ///
    /// # Safety
    /// `elements` must come from [`alloc_array_with_len`](Self::alloc_array_with_len)
    /// on this stack and still be live.
    pub unsafe fn array_len<T>(&self, elements: NonNull<T>) -> usize {
        unsafe { (elements.as_ptr() as *const u8).sub(ARRAY_PREFIX).cast::<usize>().read_unaligned() }
    }

    /// Free an array allocated with [`alloc_array_with_len`](Self::alloc_array_with_len)
    ///
    /// # Safety
    /// Same contract as [`free`](Self::free), applied to the array.
    pub unsafe fn free_array<T>(&mut self, elements: NonNull<T>) {
        unsafe { self.free((elements.as_ptr() as *mut u8).sub(ARRAY_PREFIX)) }
    }

    /// Get a marker for the current stack position
    pub fn marker(&self) -> StackMarker {
        StackMarker(self.top)
    }

    /// Rollback to a previous marker
    ///
    /// Markers above the current top (already rolled past) are ignored.
    pub fn rollback(&mut self, marker: StackMarker) {
        if self.start <= marker.0 && marker.0 <= self.top {
            log::trace!("Rolled back {} bytes", self.top - marker.0);
            self.top = marker.0;
        }
    }

    /// Open a scope whose allocations are rolled back when it is dropped
    pub fn scope(&mut self) -> StackScope<'_> {
        StackScope::new(self)
    }

    /// Usable bytes in the stack
    pub fn capacity(&self) -> usize {
        self.end - self.start
    }

    /// Bytes between the aligned start and the top of stack, headers included
    pub fn used(&self) -> usize {
        self.top - self.start
    }

    /// Bytes left above the top of stack
    pub fn available(&self) -> usize {
        self.end - self.top
    }

    /// Whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.top == self.start
    }

    /// Alignment of the first address in the stack
    pub fn base_alignment(&self) -> usize {
        self.base_alignment
    }

    /// Allocation mode chosen at construction
    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    /// Usage counters
    pub fn stats(&self) -> StackStats {
        self.stats
    }

    /// First aligned address of the stack
    pub fn start_ptr(&self) -> NonNull<u8> {
        self.ptr_at(self.start)
    }

    /// Address the next header-free allocation would return
    pub fn top_ptr(&self) -> NonNull<u8> {
        self.ptr_at(self.top)
    }

    /// Whether `ptr` lies within `start..=end`
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base_addr();
        let addr = ptr as usize;
        addr >= base + self.start && addr <= base + self.end
    }

    #[inline]
    fn base_addr(&self) -> usize {
        self.raw.as_ptr() as usize
    }

    #[inline]
    fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.end);
        // Safety: offset is within (or one past) the provider's block
        unsafe { NonNull::new_unchecked(self.raw.as_ptr().add(offset)) }
    }
}

impl Allocator for StackAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        StackAllocator::allocate(self, size, align)
    }

    unsafe fn deallocate(&mut self, ptr: *mut u8) {
        unsafe { self.free(ptr) }
    }

    fn reset(&mut self) {
        StackAllocator::reset(self)
    }

    fn capacity(&self) -> usize {
        StackAllocator::capacity(self)
    }

    fn used(&self) -> usize {
        StackAllocator::used(self)
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        log::debug!(
            "Releasing stack allocator: {} bytes ({} still in use)",
            self.capacity(),
            self.used()
        );
        // Safety: raw was acquired with exactly this layout and is released once
        unsafe { alloc::dealloc(self.raw.as_ptr(), self.layout) }
    }
}

impl core::fmt::Debug for StackAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackAllocator")
            .field("start", &self.start_ptr())
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("base_alignment", &self.base_alignment)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Marker for stack position
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackMarker(usize);

/// Scoped stack allocator guard
///
/// Derefs to the stack; everything allocated through it is rolled back on drop.
pub struct StackScope<'a> {
    stack: &'a mut StackAllocator,
    marker: StackMarker,
}

impl<'a> StackScope<'a> {
    /// Create a new scoped stack
    pub fn new(stack: &'a mut StackAllocator) -> Self {
        Self {
            marker: stack.marker(),
            stack,
        }
    }

    /// Position the scope will roll back to
    pub fn marker(&self) -> StackMarker {
        self.marker
    }
}

impl Deref for StackScope<'_> {
    type Target = StackAllocator;

    fn deref(&self) -> &StackAllocator {
        &*self.stack
    }
}

impl DerefMut for StackScope<'_> {
    fn deref_mut(&mut self) -> &mut StackAllocator {
        &mut *self.stack
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        self.stack.rollback(self.marker);
    }
}
