use std::collections::HashMap;

use anyhow::{anyhow, bail, Context};
use engine::{
    allocators::LinearAllocator,
    page_allocator::{PageAllocation, PageAllocator, PageAllocatorSettings},
};
use platform_abstraction_layer::Pal;
use serde::Serialize;
use tracing::{debug, trace};

use crate::trace::Operation;

/// Statistics about a replayed trace, printed out as JSON at the end of a run.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub page_count: u32,
    pub operations: usize,
    pub successful_allocations: u32,
    pub failed_allocations: u32,
    /// Partial allocations which got fewer pages than they asked for.
    pub truncated_allocations: u32,
    /// Allocations which didn't get a single contiguous range of pages.
    pub fragmented_allocations: u32,
    pub pages_allocated: u64,
    pub peak_pages_in_use: u32,
    pub peak_free_spans: u32,
    pub final_free_pages: u32,
    pub final_free_spans: u32,
    pub final_largest_free_span: u32,
    pub live_allocations: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Run [`PageAllocator::validate`] after every operation.
    pub validate: bool,
    /// Print the free list with [`PageAllocator::print_free_list`] at the end.
    pub dump: bool,
}

pub fn run(
    platform: &dyn Pal,
    settings: PageAllocatorSettings,
    operations: &[Operation],
    options: ReplayOptions,
) -> anyhow::Result<Report> {
    let arena_size = PageAllocator::memory_requirement(settings.page_count)
        .context("The page count is too large for this platform")?;
    let arena = LinearAllocator::new(platform, arena_size)
        .context("Failed to allocate memory for the page allocator")?;
    let mut allocator = PageAllocator::new(&arena, settings)
        .context("Failed to create the page allocator")?;
    debug!(
        "Created a page allocator for {} pages ({} bytes of bookkeeping).",
        settings.page_count,
        arena.allocated(),
    );

    // Failed allocations are stored as None, and freeing them does nothing.
    let mut live: HashMap<&str, Option<PageAllocation>> = HashMap::new();
    let mut report = Report {
        page_count: settings.page_count,
        operations: operations.len(),
        ..Default::default()
    };

    for (i, operation) in operations.iter().enumerate() {
        match operation {
            Operation::Alloc { id, pages, partial } => {
                if live.contains_key(id.as_str()) {
                    bail!("Operation #{i} allocates {id:?}, which is already allocated");
                }
                let result = if *partial {
                    allocator.alloc_partial(*pages)
                } else {
                    allocator.alloc(*pages).map(|allocation| (allocation, *pages))
                };
                match result {
                    Some((allocation, allocated)) => {
                        let ranges = allocator.ranges(&allocation).count();
                        trace!("#{i}: allocated {allocated} pages in {ranges} ranges for {id:?}");
                        report.successful_allocations += 1;
                        report.pages_allocated += allocated as u64;
                        if allocated < *pages {
                            report.truncated_allocations += 1;
                        }
                        if ranges > 1 {
                            report.fragmented_allocations += 1;
                        }
                        live.insert(id.as_str(), Some(allocation));
                    }
                    None => {
                        debug!(
                            "#{i}: failed to allocate {pages} pages for {id:?}, {} pages free",
                            allocator.free_page_count(),
                        );
                        report.failed_allocations += 1;
                        live.insert(id.as_str(), None);
                    }
                }
            }

            Operation::Free { id } => {
                let allocation = live.remove(id.as_str()).with_context(|| {
                    format!("Operation #{i} frees {id:?}, which is not allocated")
                })?;
                trace!("#{i}: freeing {id:?}");
                allocator.free_optional(allocation);
            }

            Operation::Reset => {
                trace!("#{i}: resetting, dropping {} allocations", live.len());
                allocator.reset();
                live.clear();
            }
        }

        let pages_in_use = allocator.page_count() - allocator.free_page_count();
        report.peak_pages_in_use = report.peak_pages_in_use.max(pages_in_use);
        report.peak_free_spans = report.peak_free_spans.max(allocator.free_span_count());

        if options.validate {
            allocator.validate().map_err(|violation| {
                anyhow!("Allocator invariant violated after operation #{i}: {violation:?}")
            })?;
        }
    }

    if options.dump {
        allocator.print_free_list(platform);
    }

    report.final_free_pages = allocator.free_page_count();
    report.final_free_spans = allocator.free_span_count();
    report.final_largest_free_span = allocator.largest_free_span();
    report.live_allocations = allocator.allocation_count();
    Ok(report)
}
