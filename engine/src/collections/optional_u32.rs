// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt::Debug, num::NonZeroU32};

use bytemuck::Zeroable;

/// `Option<u32>` but Zeroable and u32-sized.
///
/// But can't hold the value `0xFFFFFFFF`. Used for table indices, which are
/// kept well below that.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionalU32 {
    /// Contains the value represented by this struct, except that the inner
    /// value from [`NonZeroU32::get`] is 1 more than the value this struct
    /// represents. [`OptionalU32::set`] and [`OptionalU32::get`] handle
    /// applying this bias in both directions.
    biased_index: Option<NonZeroU32>,
}

// Safety: OptionalU32 is inhabited and all zeroes is a valid value for it (it'd
// have `biased_index: None`). For another perspective, Option<T> is Zeroable
// if T is PodInOption, and NonZeroU32 is PodInOption.
unsafe impl Zeroable for OptionalU32 {}

impl OptionalU32 {
    pub const NONE: OptionalU32 = OptionalU32 { biased_index: None };

    pub fn some(index: u32) -> OptionalU32 {
        let mut result = OptionalU32::NONE;
        result.set(index);
        result
    }

    pub fn set(&mut self, index: u32) {
        self.biased_index = Some(NonZeroU32::new(index.wrapping_add(1)).unwrap());
    }

    pub fn get(self) -> Option<u32> {
        self.biased_index
            .map(|index_plus_one| index_plus_one.get() - 1)
    }

    pub fn take(&mut self) -> Option<u32> {
        let result = self.get();
        self.biased_index = None;
        result
    }
}

impl From<Option<u32>> for OptionalU32 {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(index) => OptionalU32::some(index),
            None => OptionalU32::NONE,
        }
    }
}

impl Debug for OptionalU32 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.get().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::Zeroable;

    use super::OptionalU32;

    #[test]
    fn zeroed_is_none() {
        assert_eq!(None, OptionalU32::zeroed().get());
    }

    #[test]
    fn holds_zero_and_large_values() {
        let mut value = OptionalU32::some(0);
        assert_eq!(Some(0), value.get());
        value.set(u32::MAX - 1);
        assert_eq!(Some(u32::MAX - 1), value.take());
        assert_eq!(None, value.get());
        assert_eq!(OptionalU32::NONE, OptionalU32::from(None));
    }
}
