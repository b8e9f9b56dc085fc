// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt::Write;

use arrayvec::ArrayString;
use platform_abstraction_layer::Pal;

use super::{PageAllocator, PageRange, Span, HEAD, TAIL};

/// Error type returned by [`PageAllocator::validate`]. Any of these means
/// there's a bug in the allocator, or that a [`PageAllocation`] was used after
/// being freed.
///
/// [`PageAllocation`]: super::PageAllocation
#[derive(Debug, PartialEq)]
pub enum InvariantViolation {
    /// The free list's links are inconsistent, it doesn't end in the tail
    /// sentinel, or it contains a different amount of spans than the page
    /// map has free spans.
    BrokenFreeList,
    /// A span marked as allocated is linked into the free list.
    AllocatedSpanInFreeList { span: u32 },
    /// The free list contains a different amount of pages than the allocator
    /// thinks are free.
    FreePageCountMismatch { counted: u32, recorded: u32 },
    /// No span starts at this page even though it's not covered by the
    /// previous span.
    UncoveredPage { page: u32 },
    /// The span starting at this page is empty, overruns the page count, or
    /// disagrees with the page maps about where it starts or ends.
    PageMapMismatch { page: u32 },
    /// The free span starting at this page is right after another free span,
    /// they should've been merged.
    UncoalescedFreeSpans { page: u32 },
    /// The page maps reach a different amount of spans than the span table has
    /// in use.
    SpanCountMismatch { counted: u32, recorded: u32 },
    /// The page maps reach a different amount of allocations (spans starting a
    /// chain) than the allocator has handed out.
    AllocationCountMismatch { counted: u32, recorded: u32 },
}

impl PageAllocator<'_> {
    /// Returns the free spans in free list order, i.e. the order allocations
    /// take pages from.
    pub fn free_ranges<'s>(&'s self) -> impl Iterator<Item = PageRange> + 's {
        let spans: &'s [Span] = &self.spans;
        let mut next = spans[HEAD as usize].next.get();
        core::iter::from_fn(move || {
            let index = next.filter(|&index| index != TAIL)?;
            let span = &spans[index as usize];
            next = span.next.get();
            Some(PageRange {
                start: span.start_page,
                count: span.count,
            })
        })
    }

    /// The amount of free spans. The higher this is compared to the amount of
    /// free pages, the more fragmented the free pages are.
    pub fn free_span_count(&self) -> u32 {
        self.free_ranges().count() as u32
    }

    /// The length of the longest free span, i.e. the biggest allocation that
    /// would get contiguous pages.
    pub fn largest_free_span(&self) -> u32 {
        self.free_ranges()
            .map(|range| range.count)
            .max()
            .unwrap_or(0)
    }

    /// Checks that the free list, the page maps and the counters all agree
    /// with each other, and that there's no adjacent free spans.
    ///
    /// Walks through every span, so this is meant for tests and debugging
    /// tools, not for calling every frame.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut free_list_spans = 0;
        let mut free_list_pages = 0;
        let mut previous = HEAD;
        let mut current = self.span(HEAD).next.get();
        loop {
            let Some(index) = current.filter(|&index| (index as usize) < self.spans.len()) else {
                return Err(InvariantViolation::BrokenFreeList);
            };
            let span = self.span(index);
            if span.prev.get() != Some(previous) {
                return Err(InvariantViolation::BrokenFreeList);
            }
            if index == TAIL {
                break;
            }
            if span.allocated {
                return Err(InvariantViolation::AllocatedSpanInFreeList { span: index });
            }
            free_list_spans += 1;
            free_list_pages += span.count;
            // A cycle would make the list longer than the span table.
            if free_list_spans > self.spans.len() {
                return Err(InvariantViolation::BrokenFreeList);
            }
            previous = index;
            current = span.next.get();
        }
        if free_list_pages != self.free_page_count {
            return Err(InvariantViolation::FreePageCountMismatch {
                counted: free_list_pages,
                recorded: self.free_page_count,
            });
        }

        let mut page = 0;
        let mut spans = 0;
        let mut free_spans = 0;
        let mut chain_starts = 0;
        let mut previous_was_free = false;
        while page < self.page_count {
            let Some(index) = self.page_to_span_start[page as usize].get() else {
                return Err(InvariantViolation::UncoveredPage { page });
            };
            let span = self.span(index);
            let end = page.checked_add(span.count).filter(|&end| end <= self.page_count);
            let Some(end) = end.filter(|&end| end > page) else {
                return Err(InvariantViolation::PageMapMismatch { page });
            };
            if span.start_page != page || self.page_to_span_end[end as usize].get() != Some(index) {
                return Err(InvariantViolation::PageMapMismatch { page });
            }

            if span.allocated {
                if span.prev.get().is_none() {
                    chain_starts += 1;
                }
                previous_was_free = false;
            } else {
                if previous_was_free {
                    return Err(InvariantViolation::UncoalescedFreeSpans { page });
                }
                free_spans += 1;
                previous_was_free = true;
            }
            spans += 1;
            page = end;
        }

        if free_spans != free_list_spans {
            return Err(InvariantViolation::BrokenFreeList);
        }
        if spans != self.span_count() {
            return Err(InvariantViolation::SpanCountMismatch {
                counted: spans,
                recorded: self.span_count(),
            });
        }
        if chain_starts != self.allocation_count {
            return Err(InvariantViolation::AllocationCountMismatch {
                counted: chain_starts,
                recorded: self.allocation_count,
            });
        }

        Ok(())
    }

    /// Prints a summary of the allocator's state and the free list with
    /// [`Pal::println`], one line per free span.
    pub fn print_free_list(&self, platform: &dyn Pal) {
        let mut line = ArrayString::<128>::new();
        // The lines are well under the capacity, so the writes can't fail.
        let _ = write!(
            line,
            "page allocator: {}/{} pages free in {} spans, {} allocations, {} spans in use",
            self.free_page_count,
            self.page_count,
            self.free_span_count(),
            self.allocation_count,
            self.span_count(),
        );
        platform.println(&line);

        for (i, range) in self.free_ranges().enumerate() {
            line.clear();
            let _ = write!(
                line,
                "  free span #{i}: pages {}..{} ({} pages)",
                range.start,
                range.end(),
                range.count,
            );
            platform.println(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::{string::String, vec};

    use crate::{
        allocators::LinearAllocator,
        collections::OptionalU32,
        page_allocator::{PageAllocator, PageAllocatorSettings},
        test_platform::TestPlatform,
    };

    use super::InvariantViolation;

    fn settings(page_count: u32) -> PageAllocatorSettings {
        PageAllocatorSettings {
            page_count,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_allocator_is_valid() {
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 4096).unwrap();
        for page_count in [0, 1, 2, 100] {
            let allocator = PageAllocator::new(&arena, settings(page_count)).unwrap();
            assert_eq!(Ok(()), allocator.validate());
            assert_eq!(page_count, allocator.largest_free_span());
        }
    }

    #[test]
    fn detects_broken_bookkeeping() {
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 4096).unwrap();
        let mut allocator = PageAllocator::new(&arena, settings(16)).unwrap();
        let a = allocator.alloc(4).unwrap();
        let _b = allocator.alloc(4).unwrap();
        allocator.free(a);
        assert_eq!(Ok(()), allocator.validate());

        allocator.free_page_count += 1;
        assert_eq!(
            Err(InvariantViolation::FreePageCountMismatch {
                counted: 12,
                recorded: 13,
            }),
            allocator.validate(),
        );
        allocator.free_page_count -= 1;

        allocator.allocation_count += 1;
        assert_eq!(
            Err(InvariantViolation::AllocationCountMismatch {
                counted: 1,
                recorded: 2,
            }),
            allocator.validate(),
        );
        allocator.allocation_count -= 1;

        allocator.page_to_span_start[4] = OptionalU32::NONE;
        assert_eq!(
            Err(InvariantViolation::UncoveredPage { page: 4 }),
            allocator.validate(),
        );
    }

    #[test]
    fn detects_uncoalesced_free_spans() {
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 4096).unwrap();
        let mut allocator = PageAllocator::new(&arena, settings(8)).unwrap();
        let a = allocator.alloc(4).unwrap();
        // Marking the allocation free without merging it, like a buggy free
        // would do.
        let first_span = a.first_span;
        allocator.spans[first_span as usize].allocated = false;
        allocator.link_before(super::TAIL, first_span);
        allocator.free_page_count += 4;
        allocator.allocation_count -= 1;
        assert_eq!(
            Err(InvariantViolation::UncoalescedFreeSpans { page: 4 }),
            allocator.validate(),
        );
    }

    #[test]
    fn prints_the_free_list() {
        let platform = TestPlatform::new();
        let arena = LinearAllocator::new(&platform, 4096).unwrap();
        let mut allocator = PageAllocator::new(&arena, settings(10)).unwrap();
        let a = allocator.alloc(2).unwrap();
        let _b = allocator.alloc(2).unwrap();
        allocator.free(a);

        allocator.print_free_list(&platform);
        assert_eq!(
            vec![
                String::from(
                    "page allocator: 8/10 pages free in 2 spans, 1 allocations, 3 spans in use"
                ),
                String::from("  free span #0: pages 4..10 (6 pages)"),
                String::from("  free span #1: pages 0..2 (2 pages)"),
            ],
            platform.printed_lines(),
        );
    }
}
