// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

use core::ffi::c_void;

/// "Platform abstraction layer": the few platform services the engine's
/// allocators need, behind a trait so the engine itself stays `no_std` and
/// platform-agnostic.
///
/// The methods take `&self` so implementations can keep (internally mutable)
/// state. The trait is object safe and none of the methods are hot, so the
/// engine passes platforms around as `&dyn Pal` instead of being generic over
/// them.
pub trait Pal {
    /// Print out a line of diagnostics, e.g. a dump of an allocator's state.
    fn println(&self, message: &str);

    /// Allocate `size` bytes, returning a null pointer on failure. The engine
    /// allocates a few big blocks up front, so this doesn't need to be fast.
    ///
    /// The returned pointer must be aligned to at least 64 bytes, which is
    /// enough for any type stored in the engine's collections.
    fn malloc(&self, size: usize) -> *mut c_void;

    /// Release memory allocated with [`Pal::malloc`].
    ///
    /// ## Safety
    ///
    /// - `ptr` must have been returned by [`Pal::malloc`] of the same platform,
    ///   called with the same `size`.
    /// - The memory must not be accessed after this call.
    unsafe fn free(&self, ptr: *mut c_void, size: usize);
}
