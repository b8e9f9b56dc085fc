// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Allocator for "pages" of a fixed-size pool, e.g. the tiles of a virtual
//! texture or the blocks of a sparse GPU heap.
//!
//! The pages themselves are just indices, this module only does the
//! bookkeeping of which indices belong to which allocation. Allocations don't
//! need to be contiguous: an allocation is a chain of spans (contiguous runs
//! of pages), and freeing an allocation merges its spans back with any
//! neighboring free spans.

mod diagnostics;

use bytemuck::Zeroable;

use crate::{
    allocators::LinearAllocator,
    collections::{FixedVec, OptionalU32},
};

pub use diagnostics::InvariantViolation;

/// Span table index of the free list's head sentinel.
const HEAD: u32 = 0;
/// Span table index of the free list's tail sentinel.
const TAIL: u32 = 1;
const SENTINEL_COUNT: u32 = 2;

/// Settings for creating a [`PageAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageAllocatorSettings {
    /// The amount of pages in the pool. Pages are referred to by the indices
    /// `0..page_count`.
    pub page_count: u32,
    /// Freed spans that don't merge with their neighbors are added to the front
    /// of the free list if they're at least this many pages long, and to the
    /// back otherwise. Allocations take pages from the front of the free list,
    /// so this keeps big free spans where big allocations find them, and small
    /// allocations from eating away at them.
    ///
    /// Only affects fragmentation, not correctness.
    pub head_insertion_threshold: u32,
}

impl Default for PageAllocatorSettings {
    fn default() -> Self {
        PageAllocatorSettings {
            page_count: 512,
            head_insertion_threshold: 24,
        }
    }
}

/// A contiguous range of pages: `start..start + count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub count: u32,
}

impl PageRange {
    /// The first page index after this range.
    pub fn end(self) -> u32 {
        self.start + self.count
    }
}

/// Handle to an allocation made with [`PageAllocator::alloc`] or
/// [`PageAllocator::alloc_partial`]. Pass it back to [`PageAllocator::free`]
/// to release the pages.
///
/// Only valid for the allocator that created it, and only until it's freed or
/// the allocator is reset. Using it after that is a bug, but it will not cause
/// memory unsafety, just nonsensical page indices and broken bookkeeping.
#[derive(Debug)]
pub struct PageAllocation {
    first_span: u32,
}

/// Error type returned by [`PageAllocator::page_array`] and
/// [`PageAllocator::range_array`].
#[derive(Debug, PartialEq)]
pub enum PageListError {
    /// The output array filled up before all the pages or ranges of the
    /// allocation were written. The ones that fit were written.
    NotEnoughCapacity,
}

/// A contiguous run of pages, either free or owned by an allocation.
#[derive(Clone, Copy, Debug, Default)]
struct Span {
    start_page: u32,
    count: u32,
    /// Next span in the free list if free, or the next span of the same
    /// allocation if allocated.
    next: OptionalU32,
    /// Previous span in the free list if free. For allocated spans, the
    /// previous span of the same allocation, or none for the first span.
    prev: OptionalU32,
    allocated: bool,
}

// Safety: all the fields are Zeroable (u32, OptionalU32, bool), and Span has no
// padding-dependent invariants, so all zeroes is a valid Span.
unsafe impl Zeroable for Span {}

/// Fixed-capacity allocator for pages, i.e. indices in `0..page_count`.
///
/// Free pages are tracked as spans in a doubly linked free list. Allocating
/// takes spans from the front of the free list until the requested amount of
/// pages has been gathered (splitting the last one if it's too big), so an
/// allocation may consist of multiple non-contiguous spans. Freeing merges the
/// spans with their free neighbors, so no two free spans are ever adjacent.
///
/// All the bookkeeping lives in tables allocated once at creation, and the
/// spans refer to each other by index, so allocating and freeing never
/// allocates memory.
///
/// Not thread-safe in any way, callers sharing one between threads need to
/// synchronize access themselves.
#[derive(Debug)]
pub struct PageAllocator<'a> {
    /// The span table. Indices [`HEAD`] and [`TAIL`] are the free list
    /// sentinels, the rest are spans in use or in `unused_spans`.
    spans: FixedVec<'a, Span>,
    /// For each page index, the span starting at that page, if any. Has an
    /// extra element at the end (which is always none) to avoid bounds checks
    /// when looking up the span after the last one.
    page_to_span_start: FixedVec<'a, OptionalU32>,
    /// For each page index, the span ending right before that page, if any.
    /// I.e. indexed by the exclusive end of the span.
    page_to_span_end: FixedVec<'a, OptionalU32>,
    /// Stack of span table indices not currently used by any span.
    unused_spans: FixedVec<'a, u32>,
    page_count: u32,
    head_insertion_threshold: u32,
    free_page_count: u32,
    allocation_count: u32,
}

impl PageAllocator<'_> {
    /// Creates a new [`PageAllocator`] with all the pages free, allocating the
    /// bookkeeping tables from `arena`. Returns None if `arena` doesn't have
    /// enough memory left, see [`PageAllocator::memory_requirement`], or if
    /// the page count is too close to [`u32::MAX`] to index the spans.
    pub fn new<'a>(
        arena: &'a LinearAllocator,
        settings: PageAllocatorSettings,
    ) -> Option<PageAllocator<'a>> {
        let PageAllocatorSettings {
            page_count,
            head_insertion_threshold,
        } = settings;
        let max_span_count = page_count
            .checked_add(SENTINEL_COUNT)
            .filter(|&count| count < u32::MAX)?;

        let mut allocator = PageAllocator {
            spans: FixedVec::new(arena, max_span_count as usize)?,
            page_to_span_start: FixedVec::new(arena, page_count as usize + 1)?,
            page_to_span_end: FixedVec::new(arena, page_count as usize + 1)?,
            unused_spans: FixedVec::new(arena, page_count as usize)?,
            page_count,
            head_insertion_threshold,
            free_page_count: 0,
            allocation_count: 0,
        };
        allocator.reset();
        Some(allocator)
    }

    /// Returns the amount of bytes a [`LinearAllocator`] needs to have free to
    /// create a [`PageAllocator`] with the given page count. Returns None if
    /// the requirement overflows `usize`.
    pub fn memory_requirement(page_count: u32) -> Option<usize> {
        let span_count = (page_count as usize).checked_add(SENTINEL_COUNT as usize)?;
        let map_len = (page_count as usize).checked_add(1)?;
        [
            LinearAllocator::slice_requirement::<Span>(span_count)?,
            LinearAllocator::slice_requirement::<OptionalU32>(map_len)?,
            LinearAllocator::slice_requirement::<OptionalU32>(map_len)?,
            LinearAllocator::slice_requirement::<u32>(page_count as usize)?,
        ]
        .into_iter()
        .try_fold(0usize, |total, bytes| total.checked_add(bytes))
    }

    /// Frees all pages, returning the allocator to the state it was created
    /// in. Any [`PageAllocation`]s from before the reset must not be used
    /// afterwards.
    pub fn reset(&mut self) {
        self.spans.clear();
        self.spans.fill_with_zeroes();
        self.page_to_span_start.clear();
        self.page_to_span_start.fill_with_zeroes();
        self.page_to_span_end.clear();
        self.page_to_span_end.fill_with_zeroes();

        // Pushed in reverse so that the lowest indices are popped first.
        self.unused_spans.clear();
        for index in (SENTINEL_COUNT..self.spans.len() as u32).rev() {
            self.unused_spans.push(index).unwrap();
        }

        self.span_mut(HEAD).next = OptionalU32::some(TAIL);
        self.span_mut(TAIL).prev = OptionalU32::some(HEAD);

        self.free_page_count = 0;
        self.allocation_count = 0;

        if self.page_count > 0 {
            let span = self.acquire_span();
            self.set_span_pages(span, 0, self.page_count);
            self.link_after(HEAD, span);
            self.free_page_count = self.page_count;
        }
    }

    /// Allocates `count` pages. The pages are not necessarily contiguous, see
    /// [`PageAllocator::ranges`] and [`PageAllocator::pages`] for getting the
    /// actual page indices.
    ///
    /// Returns None if `count` is zero or if there's less than `count` free
    /// pages.
    pub fn alloc(&mut self, count: u32) -> Option<PageAllocation> {
        if count == 0 || count > self.free_page_count {
            return None;
        }

        let first_span = self.next_of(HEAD);
        let mut remaining = count;
        let mut current = first_span;
        let last_span = loop {
            assert_ne!(
                TAIL, current,
                "the free list ran out before the free page count did"
            );
            let span_count = self.span(current).count;
            if span_count >= remaining {
                if span_count > remaining {
                    self.split_span(current, remaining);
                }
                self.span_mut(current).allocated = true;
                break current;
            }
            self.span_mut(current).allocated = true;
            remaining -= span_count;
            current = self.next_of(current);
        };

        // Cut the consumed spans off the free list in one go. They stay linked
        // to each other, as the chain of spans of this allocation.
        let rest_of_free_list = self.next_of(last_span);
        self.span_mut(HEAD).next = OptionalU32::some(rest_of_free_list);
        self.span_mut(rest_of_free_list).prev = OptionalU32::some(HEAD);
        self.span_mut(last_span).next = OptionalU32::NONE;
        self.span_mut(first_span).prev = OptionalU32::NONE;

        self.free_page_count -= count;
        self.allocation_count += 1;

        Some(PageAllocation { first_span })
    }

    /// Allocates `count` pages, or as many as are free if there's less than
    /// `count` free pages. Returns the allocation and the amount of pages
    /// actually allocated, or None if no pages could be allocated.
    pub fn alloc_partial(&mut self, count: u32) -> Option<(PageAllocation, u32)> {
        let count = count.min(self.free_page_count);
        let allocation = self.alloc(count)?;
        Some((allocation, count))
    }

    /// Frees the pages of the allocation, merging them with adjacent free
    /// pages.
    pub fn free(&mut self, allocation: PageAllocation) {
        let mut current = Some(allocation.first_span);
        while let Some(index) = current {
            current = self.span(index).next.get();
            self.free_span(index);
        }
        self.allocation_count -= 1;
    }

    /// [`PageAllocator::free`], but does nothing for `None`, e.g. the result of
    /// a failed allocation.
    pub fn free_optional(&mut self, allocation: Option<PageAllocation>) {
        if let Some(allocation) = allocation {
            self.free(allocation);
        }
    }

    /// Returns the contiguous page ranges of the allocation, in allocation
    /// order (not necessarily ascending).
    pub fn ranges<'s>(&'s self, allocation: &PageAllocation) -> impl Iterator<Item = PageRange> + 's {
        let spans: &'s [Span] = &self.spans;
        let mut next = Some(allocation.first_span);
        core::iter::from_fn(move || {
            let span = &spans[next? as usize];
            next = span.next.get();
            Some(PageRange {
                start: span.start_page,
                count: span.count,
            })
        })
    }

    /// Returns every page index of the allocation, in allocation order (not
    /// necessarily ascending).
    pub fn pages<'s>(&'s self, allocation: &PageAllocation) -> impl Iterator<Item = u32> + 's {
        self.ranges(allocation)
            .flat_map(|range| range.start..range.end())
    }

    /// Writes the page indices of the allocation into `out`, each offset by
    /// `page_offset`. If `append` is false, `out` is cleared first.
    pub fn page_array(
        &self,
        allocation: &PageAllocation,
        page_offset: u32,
        append: bool,
        out: &mut FixedVec<u32>,
    ) -> Result<(), PageListError> {
        if !append {
            out.clear();
        }
        for page in self.pages(allocation) {
            out.push(page + page_offset)
                .map_err(|_| PageListError::NotEnoughCapacity)?;
        }
        Ok(())
    }

    /// Writes the contiguous ranges of the allocation into `out`, with the
    /// start of each range offset by `page_offset`. If `append` is false, `out`
    /// is cleared first.
    pub fn range_array(
        &self,
        allocation: &PageAllocation,
        page_offset: u32,
        append: bool,
        out: &mut FixedVec<PageRange>,
    ) -> Result<(), PageListError> {
        if !append {
            out.clear();
        }
        for range in self.ranges(allocation) {
            let range = PageRange {
                start: range.start + page_offset,
                count: range.count,
            };
            out.push(range)
                .map_err(|_| PageListError::NotEnoughCapacity)?;
        }
        Ok(())
    }

    /// The first page of the allocation. Only describes the whole allocation
    /// if it consists of a single span.
    pub fn allocation_start_page(&self, allocation: &PageAllocation) -> u32 {
        self.span(allocation.first_span).start_page
    }

    /// The total amount of pages in the allocation.
    pub fn allocation_page_count(&self, allocation: &PageAllocation) -> u32 {
        self.ranges(allocation).map(|range| range.count).sum()
    }

    /// The amount of spans in use, free and allocated.
    pub fn span_count(&self) -> u32 {
        self.spans.len() as u32 - SENTINEL_COUNT - self.unused_spans.len() as u32
    }

    /// The amount of allocations that haven't been freed yet.
    pub fn allocation_count(&self) -> u32 {
        self.allocation_count
    }

    pub fn free_page_count(&self) -> u32 {
        self.free_page_count
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    fn free_span(&mut self, index: u32) {
        let span = self.span_mut(index);
        assert!(span.allocated, "freed a span that is not allocated");
        span.allocated = false;
        span.next = OptionalU32::NONE;
        span.prev = OptionalU32::NONE;
        let Span {
            start_page, count, ..
        } = *span;
        self.free_page_count += count;

        let left = self.page_to_span_end[start_page as usize]
            .get()
            .filter(|&left| !self.span(left).allocated);
        let right = self.page_to_span_start[(start_page + count) as usize]
            .get()
            .filter(|&right| !self.span(right).allocated);

        // The merged span takes the list position of the neighbor it merged
        // into, since `index` is not in the free list.
        match (left, right) {
            (None, None) => {
                if count >= self.head_insertion_threshold {
                    self.link_after(HEAD, index);
                } else {
                    self.link_before(TAIL, index);
                }
            }
            (Some(left), None) => self.merge_spans(left, index, left),
            (None, Some(right)) => self.merge_spans(index, right, right),
            (Some(left), Some(right)) => {
                self.merge_spans(left, index, left);
                self.unlink(right);
                self.merge_spans(left, right, left);
            }
        }
    }

    /// Shrinks the span to `count` pages, moving the rest of its pages to a new
    /// span, which is linked right after it. Returns the new span.
    fn split_span(&mut self, index: u32, count: u32) -> u32 {
        let span = *self.span(index);
        assert!(
            count > 0 && count < span.count,
            "can't split {count} pages off a span of {} pages",
            span.count,
        );

        let tail = self.acquire_span();
        self.span_mut(tail).allocated = span.allocated;
        self.set_span_pages(index, span.start_page, count);
        self.set_span_pages(tail, span.start_page + count, span.count - count);
        self.link_after(index, tail);
        tail
    }

    /// Merges two adjacent spans into `survivor`, which must be either `left`
    /// or `right`. The other one is released.
    fn merge_spans(&mut self, left: u32, right: u32, survivor: u32) {
        let left_span = *self.span(left);
        let right_span = *self.span(right);
        assert_eq!(
            left_span.allocated, right_span.allocated,
            "can't merge an allocated span with a free one",
        );
        assert_eq!(
            left_span.start_page + left_span.count,
            right_span.start_page,
            "can't merge non-adjacent spans",
        );

        let absorbed = if survivor == left { right } else { left };
        self.clear_span_pages(left);
        self.clear_span_pages(right);
        self.set_span_pages(
            survivor,
            left_span.start_page,
            left_span.count + right_span.count,
        );
        self.release_span(absorbed);
    }

    fn acquire_span(&mut self) -> u32 {
        let index = self
            .unused_spans
            .pop()
            .expect("the span table should have room for a span per page");
        *self.span_mut(index) = Span::default();
        index
    }

    fn release_span(&mut self, index: u32) {
        *self.span_mut(index) = Span::default();
        assert!(
            self.unused_spans.push(index).is_ok(),
            "released more spans than there are in the span table",
        );
    }

    fn set_span_pages(&mut self, index: u32, start_page: u32, count: u32) {
        let span = self.span_mut(index);
        span.start_page = start_page;
        span.count = count;
        self.page_to_span_start[start_page as usize].set(index);
        self.page_to_span_end[(start_page + count) as usize].set(index);
    }

    fn clear_span_pages(&mut self, index: u32) {
        let Span {
            start_page, count, ..
        } = *self.span(index);
        let start = &mut self.page_to_span_start[start_page as usize];
        if start.get() == Some(index) {
            start.take();
        }
        let end = &mut self.page_to_span_end[(start_page + count) as usize];
        if end.get() == Some(index) {
            end.take();
        }
    }

    fn link_after(&mut self, anchor: u32, index: u32) {
        let next = self.next_of(anchor);
        let span = self.span_mut(index);
        span.prev = OptionalU32::some(anchor);
        span.next = OptionalU32::some(next);
        self.span_mut(anchor).next = OptionalU32::some(index);
        self.span_mut(next).prev = OptionalU32::some(index);
    }

    fn link_before(&mut self, anchor: u32, index: u32) {
        let prev = self
            .span(anchor)
            .prev
            .get()
            .expect("only the head sentinel is missing a previous span in the free list");
        self.link_after(prev, index);
    }

    fn unlink(&mut self, index: u32) {
        let span = self.span_mut(index);
        let prev = span.prev.take().expect("unlinked span should be in the free list");
        let next = span.next.take().expect("unlinked span should be in the free list");
        self.span_mut(prev).next = OptionalU32::some(next);
        self.span_mut(next).prev = OptionalU32::some(prev);
    }

    fn next_of(&self, index: u32) -> u32 {
        self.span(index)
            .next
            .get()
            .expect("only the tail sentinel is missing a next span in the free list")
    }

    fn span(&self, index: u32) -> &Span {
        &self.spans[index as usize]
    }

    fn span_mut(&mut self, index: u32) -> &mut Span {
        &mut self.spans[index as usize]
    }
}
