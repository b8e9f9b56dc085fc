// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    fmt::Debug,
    mem::{needs_drop, transmute, MaybeUninit},
    ops::{Deref, DerefMut},
};

use bytemuck::{fill_zeroes, Zeroable};

use crate::allocators::LinearAllocator;

/// An array with a capacity picked at creation, backed by memory from a
/// [`LinearAllocator`].
///
/// Pushing past the capacity fails instead of reallocating, so the page
/// allocator's tables never move or grow after they're created. The memory
/// past the current length stays uninitialized until it's pushed to or
/// zeroed with [`FixedVec::fill_with_zeroes`].
pub struct FixedVec<'a, T> {
    slots: &'a mut [MaybeUninit<T>],
    len: usize,
}

impl<T> FixedVec<'_, T> {
    /// Allocates room for `capacity` elements from `arena`. Returns None if
    /// the arena is out of memory.
    pub fn new<'a>(arena: &'a LinearAllocator, capacity: usize) -> Option<FixedVec<'a, T>> {
        let slots = arena.try_alloc_uninit_slice::<T>(capacity)?;
        Some(FixedVec { slots, len: 0 })
    }

    /// Appends the value, or hands it back if the array is full.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        match self.slots.get_mut(self.len) {
            Some(slot) => {
                // Slots at or past `len` are uninitialized, so nothing is
                // overwritten without being dropped.
                slot.write(value);
                self.len += 1;
                Ok(())
            }
            None => Err(value),
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        self.len = self.len.checked_sub(1)?;
        // Safety: the slot at the old `len - 1` was initialized, and it's now
        // past `len`, so it won't be read or dropped again.
        Some(unsafe { self.slots[self.len].assume_init_read() })
    }

    /// Drops all the elements, keeping the capacity.
    pub fn clear(&mut self) {
        let len = self.len;
        // Zeroed first, so a panicking drop can't cause a double drop.
        self.len = 0;
        if needs_drop::<T>() {
            for slot in &mut self.slots[..len] {
                // Safety: every slot before the old `len` was initialized.
                unsafe { slot.assume_init_drop() };
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
}

impl<T: Zeroable> FixedVec<'_, T> {
    /// Grows the array to its full capacity, filling the new elements with
    /// zeroes.
    pub fn fill_with_zeroes(&mut self) {
        fill_zeroes(&mut self.slots[self.len..]);
        // Safety: the slots before `len` were already initialized, and an all
        // zeroes T is valid since T is Zeroable.
        self.len = self.slots.len();
    }
}

impl<T> Drop for FixedVec<'_, T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T> Deref for FixedVec<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        let initialized = &self.slots[..self.len];
        // Safety: MaybeUninit<T> has the same layout as T, and the slots
        // before `len` are initialized.
        unsafe { transmute::<&[MaybeUninit<T>], &[T]>(initialized) }
    }
}

impl<T> DerefMut for FixedVec<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        let initialized = &mut self.slots[..self.len];
        // Safety: see Deref.
        unsafe { transmute::<&mut [MaybeUninit<T>], &mut [T]>(initialized) }
    }
}

impl<T: Debug> Debug for FixedVec<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use crate::{allocators::LinearAllocator, collections::FixedVec, test_platform::TestPlatform};

    struct Counted<'a>(&'a Cell<i32>);

    impl<'a> Counted<'a> {
        fn new(live: &'a Cell<i32>) -> Counted<'a> {
            live.set(live.get() + 1);
            Counted(live)
        }
    }

    impl Drop for Counted<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    #[test]
    fn drops_exactly_what_was_pushed() {
        const CAPACITY: usize = 16;
        let live = Cell::new(0);
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 1024).unwrap();
        let mut vec: FixedVec<Counted> = FixedVec::new(&arena, CAPACITY).unwrap();

        for _ in 0..CAPACITY / 2 {
            assert!(vec.push(Counted::new(&live)).is_ok());
        }
        assert_eq!(8, live.get());
        drop(vec.pop());
        assert_eq!(7, live.get());
        vec.clear();
        assert_eq!(0, live.get());

        for _ in 0..CAPACITY {
            assert!(vec.push(Counted::new(&live)).is_ok());
        }
        assert!(vec.is_full());
        // The rejected element is handed back and dropped here.
        assert!(vec.push(Counted::new(&live)).is_err());
        assert_eq!(CAPACITY as i32, live.get());

        drop(vec);
        assert_eq!(0, live.get());
    }

    #[test]
    fn zero_filling_initializes_the_whole_capacity() {
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 64).unwrap();
        let mut vec: FixedVec<u32> = FixedVec::new(&arena, 8).unwrap();
        vec.push(7).unwrap();
        vec.fill_with_zeroes();
        assert!(vec.is_full());
        assert_eq!(8, vec.capacity());
        assert_eq!(&[7, 0, 0, 0, 0, 0, 0, 0], &vec[..]);
        assert_eq!(Some(0), vec.pop());
        vec[0] = 3;
        assert_eq!(&[3, 0, 0, 0, 0, 0, 0], &vec[..]);
    }
}
