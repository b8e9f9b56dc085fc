// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, ffi::c_void, fmt::Debug, mem::MaybeUninit, slice};

use platform_abstraction_layer::Pal;

/// A linear allocator with a constant capacity. Can allocate memory regions
/// with any size or alignment (within the capacity) very fast, but individual
/// allocations can't be freed to make more space while there's still other
/// allocations in use.
///
/// The engine's long-lived tables (e.g. the span tables of a
/// [`PageAllocator`](crate::page_allocator::PageAllocator)) are allocated from
/// one of these once, and live as long as the borrow of the allocator.
pub struct LinearAllocator<'eng> {
    backing_mem_ptr: *mut c_void,
    backing_mem_size: usize,
    /// The platform where the memory was allocated from, and where it's
    /// returned to on drop.
    platform: &'eng dyn Pal,
    /// The amount of bytes allocated starting from `backing_mem_ptr`. Never
    /// larger than `backing_mem_size`.
    allocated: Cell<usize>,
}

impl Debug for LinearAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("backing_mem_ptr", &self.backing_mem_ptr)
            .field("backing_mem_size", &self.backing_mem_size)
            .field("allocated", &self.allocated)
            .finish_non_exhaustive()
    }
}

impl Drop for LinearAllocator<'_> {
    fn drop(&mut self) {
        self.reset();
        // Safety: reset "frees" everything, so we can be sure that there's no
        // pointers to the memory backed by this pointer anymore, so it's safe
        // to free. The pointer and size are the ones passed to and returned
        // from the platform's malloc in the constructor.
        unsafe {
            self.platform
                .free(self.backing_mem_ptr, self.backing_mem_size)
        };
    }
}

impl LinearAllocator<'_> {
    /// Creates a new [`LinearAllocator`] with `capacity` bytes of backing
    /// memory. Returns None if allocating the memory fails or if `capacity`
    /// overflows `isize`.
    pub fn new(platform: &dyn Pal, capacity: usize) -> Option<LinearAllocator> {
        if capacity > isize::MAX as usize {
            // Practically never happens, but asserting this here helps avoid a
            // safety check later.
            return None;
        }

        let backing_mem_ptr = platform.malloc(capacity);
        if backing_mem_ptr.is_null() {
            return None;
        }

        Some(LinearAllocator {
            backing_mem_ptr,
            backing_mem_size: capacity,
            platform,

            allocated: Cell::new(0),
        })
    }

    /// Returns the amount of bytes currently allocated, including the padding
    /// used for aligning the allocations.
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// Returns the total (free and allocated) amount of memory owned by this
    /// allocator, in bytes.
    pub fn total(&self) -> usize {
        self.backing_mem_size
    }

    /// Returns the amount of bytes that a slice of `len` `T`s may take from a
    /// [`LinearAllocator`] in the worst case, i.e. with maximal alignment
    /// padding. Returns None if the size overflows `usize`.
    pub const fn slice_requirement<T>(len: usize) -> Option<usize> {
        match len.checked_mul(size_of::<T>()) {
            Some(bytes) => bytes.checked_add(align_of::<T>() - 1),
            None => None,
        }
    }

    /// Allocates memory for a slice of `MaybeUninit<T>`, leaving the contents
    /// of the slice uninitialized, returning None if there's not enough free
    /// memory.
    pub fn try_alloc_uninit_slice<'a, T>(&'a self, len: usize) -> Option<&'a mut [MaybeUninit<T>]> {
        // Safety:
        // - The computed offset does not overflow `isize`: any value stored in
        //   `self.allocated` is checked to be no larger than
        //   `self.backing_mem_size` which in turn is no larger than
        //   `isize::MAX`.
        // - `self.backing_mem_ptr` is a pointer to an allocated object (it's
        //   from a successful `malloc`), and `self.allocated` is never larger
        //   than the amount of memory we asked for. So the memory range between
        //   `self.backing_mem_ptr` and the result is within the bounds of the
        //   allocated object.
        let previously_allocated_ptr =
            unsafe { self.backing_mem_ptr.byte_add(self.allocated.get()) };

        let extra_offset_for_alignment = previously_allocated_ptr.align_offset(align_of::<T>());
        let offset_into_allocation = self
            .allocated
            .get()
            .checked_add(extra_offset_for_alignment)?;

        let new_allocated = len
            .checked_mul(size_of::<T>())
            .and_then(|bytes| bytes.checked_add(offset_into_allocation))?;
        if new_allocated > self.backing_mem_size {
            return None;
        }

        // This value only goes up (until the exclusively borrowing reset),
        // which ensures that allocations don't overlap.
        self.allocated.set(new_allocated);

        // Safety: `offset_into_allocation + len * size_of::<T>()` is not larger
        // than `self.backing_mem_size` (checked above), which is not larger
        // than `isize::MAX`, and the resulting pointer stays within the
        // malloc'd object.
        let now_allocated_ptr = unsafe { self.backing_mem_ptr.byte_add(offset_into_allocation) };
        let uninit_t_ptr = now_allocated_ptr as *mut MaybeUninit<T>;

        // Safety:
        // - `uninit_t_ptr` is non-null, aligned for T (see the align_offset
        //   above), and valid for reads and writes of `len` elements, all
        //   within the single allocated object from the constructor.
        // - Uninitialized values are valid for `MaybeUninit<T>`.
        // - The memory is not accessed through any other pointer for the
        //   lifetime 'a, since `self.allocated` has been bumped past the end of
        //   this slice, and it's only reset with an exclusive borrow of self.
        // - The total size is not larger than `isize::MAX`, as checked above.
        let uninit_t_slice: &'a mut [MaybeUninit<T>] =
            unsafe { slice::from_raw_parts_mut(uninit_t_ptr, len) };

        Some(uninit_t_slice)
    }

    /// Resets the linear allocator, reclaiming all of the backing memory for
    /// future allocations.
    pub fn reset(&mut self) {
        // Safety: though this is not an unsafe operation, the unsafety in this
        // file relies on `self.backing_mem_ptr + self.allocated` to not point
        // into memory which is already being borrowed. We have an exclusive
        // borrow of self, so there's no other borrows of self, so none of the
        // slices handed out (which can't outlive a borrow of self) exist.
        self.allocated.set(0);
    }
}

#[cfg(test)]
mod tests {
    use crate::test_platform::TestPlatform;

    use super::LinearAllocator;

    #[test]
    fn refuses_allocations_past_capacity() {
        let platform = TestPlatform::new();
        let alloc = LinearAllocator::new(&platform, 16).unwrap();
        assert!(alloc.try_alloc_uninit_slice::<u32>(3).is_some());
        assert!(alloc.try_alloc_uninit_slice::<u32>(1).is_some());
        assert_eq!(16, alloc.allocated());
        assert!(
            alloc.try_alloc_uninit_slice::<u8>(1).is_none(),
            "allocated past the capacity of the backing memory?",
        );
    }

    #[test]
    fn reset_reclaims_memory() {
        let platform = TestPlatform::new();
        let mut alloc = LinearAllocator::new(&platform, 8).unwrap();
        assert!(alloc.try_alloc_uninit_slice::<u64>(1).is_some());
        assert!(alloc.try_alloc_uninit_slice::<u64>(1).is_none());
        alloc.reset();
        assert_eq!(0, alloc.allocated());
        assert!(alloc.try_alloc_uninit_slice::<u64>(1).is_some());
    }

    #[test]
    fn huge_lengths_do_not_overflow() {
        let platform = TestPlatform::new();
        let alloc = LinearAllocator::new(&platform, 64).unwrap();
        assert!(alloc.try_alloc_uninit_slice::<u64>(usize::MAX / 4).is_none());
        assert_eq!(None, LinearAllocator::slice_requirement::<u64>(usize::MAX));
        assert_eq!(Some(8 * 3 + 7), LinearAllocator::slice_requirement::<u64>(3));
    }
}
