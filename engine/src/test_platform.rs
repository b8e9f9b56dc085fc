// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

extern crate alloc;

use core::{cell::RefCell, ffi::c_void};

use alloc::{string::String, vec::Vec};
use platform_abstraction_layer::Pal;

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct VeryAlignedThing([u8; 64]);
const VERY_ALIGNED_THING: VeryAlignedThing = VeryAlignedThing([0; 64]);

/// A [`Pal`] for tests: allocates from the global allocator and records the
/// printed lines instead of printing them.
#[derive(Default)]
pub struct TestPlatform {
    printed_lines: RefCell<Vec<String>>,
}

impl TestPlatform {
    pub fn new() -> TestPlatform {
        TestPlatform::default()
    }

    /// Returns the lines passed to [`Pal::println`] so far.
    pub fn printed_lines(&self) -> Vec<String> {
        self.printed_lines.borrow().clone()
    }
}

impl Pal for TestPlatform {
    fn println(&self, message: &str) {
        self.printed_lines.borrow_mut().push(String::from(message));
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        let byte_vec: Vec<VeryAlignedThing> = alloc::vec![VERY_ALIGNED_THING; count];
        let vec_ptr: *mut VeryAlignedThing = byte_vec.leak().as_mut_ptr();
        vec_ptr as *mut c_void
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        let vec_ptr = ptr as *mut VeryAlignedThing;
        // Safety: ptr was allocated by a Vec<VeryAlignedThing> of `count`
        // elements in `malloc` (the caller guarantees the same `size`), so the
        // length and capacity match the original Vec, as required by
        // Vec::from_raw_parts.
        let vec: Vec<VeryAlignedThing> = unsafe { Vec::from_raw_parts(vec_ptr, count, count) };
        drop(vec);
    }
}
