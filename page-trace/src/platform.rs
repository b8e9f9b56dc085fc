use std::{
    alloc::{alloc, dealloc, Layout},
    ffi::c_void,
    ptr::null_mut,
};

use platform_abstraction_layer::Pal;
use tracing::info;

/// Alignment of the memory returned by [`StdPlatform::malloc`], as required
/// by [`Pal::malloc`].
const ALIGNMENT: usize = 64;

/// [`Pal`] implementation on top of the standard library, for running the
/// engine's allocators in a command line tool.
pub struct StdPlatform;

impl StdPlatform {
    fn layout(size: usize) -> Option<Layout> {
        // Zero-sized allocations are not allowed by the global allocator.
        Layout::from_size_align(size.max(1), ALIGNMENT).ok()
    }
}

impl Pal for StdPlatform {
    fn println(&self, message: &str) {
        info!("{message}");
    }

    fn malloc(&self, size: usize) -> *mut c_void {
        let Some(layout) = StdPlatform::layout(size) else {
            return null_mut();
        };
        // Safety: the layout is not zero-sized.
        unsafe { alloc(layout) as *mut c_void }
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        let layout = StdPlatform::layout(size)
            .expect("the size passed to free should be the one passed to malloc");
        // Safety: the caller guarantees that ptr is from malloc, with the same
        // size, so it was allocated with this same layout.
        unsafe { dealloc(ptr as *mut u8, layout) };
    }
}

#[cfg(test)]
mod tests {
    use engine::allocators::LinearAllocator;

    use super::StdPlatform;

    #[test]
    fn backs_linear_allocators() {
        let platform = StdPlatform;
        let arena = LinearAllocator::new(&platform, 1024).unwrap();
        let slice = arena.try_alloc_uninit_slice::<u64>(128).unwrap();
        assert_eq!(128, slice.len());
        assert!(arena.try_alloc_uninit_slice::<u8>(1).is_none());
    }
}
