use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use crate::trace::Operation;

/// Odds of an operation being a free, when there's something to free.
const FREE_PROBABILITY: f64 = 0.45;
/// Odds of an operation being a reset.
const RESET_PROBABILITY: f64 = 0.001;
/// Odds of an allocation allowing fewer pages than requested.
const PARTIAL_PROBABILITY: f64 = 0.1;

/// Generates `count` random operations, allocating up to `max_request` pages
/// at a time. The same seed always generates the same operations.
///
/// The generated frees only refer to allocations made before them, but the
/// allocations aren't guaranteed to succeed, so the trace relies on frees of
/// failed allocations being no-ops.
pub fn generate(seed: u64, count: u32, max_request: u32) -> Vec<Operation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live_ids: Vec<String> = Vec::new();
    let mut next_id = 0;
    let mut operations = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if rng.gen_bool(RESET_PROBABILITY) {
            live_ids.clear();
            operations.push(Operation::Reset);
        } else if !live_ids.is_empty() && rng.gen_bool(FREE_PROBABILITY) {
            let i = rng.gen_range(0..live_ids.len());
            operations.push(Operation::Free {
                id: live_ids.swap_remove(i),
            });
        } else {
            let id = format!("alloc-{next_id}");
            next_id += 1;
            live_ids.push(id.clone());
            operations.push(Operation::Alloc {
                id,
                pages: rng.gen_range(1..=max_request.max(1)),
                partial: rng.gen_bool(PARTIAL_PROBABILITY),
            });
        }
    }

    debug!(
        "Generated {} operations from seed {seed}, {} allocations left unfreed.",
        operations.len(),
        live_ids.len(),
    );
    operations
}

#[cfg(test)]
mod tests {
    use engine::page_allocator::PageAllocatorSettings;

    use crate::{
        platform::StdPlatform,
        replay::{run, ReplayOptions},
        trace::Operation,
    };

    use super::generate;

    #[test]
    fn same_seed_same_operations() {
        assert_eq!(generate(7, 500, 16), generate(7, 500, 16));
        assert_ne!(generate(7, 500, 16), generate(8, 500, 16));
    }

    #[test]
    fn frees_only_refer_to_earlier_allocations() {
        let operations = generate(1, 2000, 32);
        let mut allocated = std::collections::HashSet::new();
        for operation in &operations {
            match operation {
                Operation::Alloc { id, pages, .. } => {
                    assert!((1..=32).contains(pages));
                    assert!(allocated.insert(id.clone()), "{id} allocated twice");
                }
                Operation::Free { id } => assert!(allocated.remove(id), "{id} freed twice"),
                Operation::Reset => allocated.clear(),
            }
        }
    }

    #[test]
    fn generated_operations_replay_with_valid_invariants() {
        for seed in 0..4 {
            let operations = generate(seed, 3000, 48);
            let settings = PageAllocatorSettings {
                page_count: 256,
                ..Default::default()
            };
            let options = ReplayOptions {
                validate: true,
                dump: false,
            };
            let report = run(&StdPlatform, settings, &operations, options).unwrap();
            assert_eq!(3000, report.operations);
            assert!(report.successful_allocations > 0);
            assert!(report.peak_pages_in_use <= 256);
        }
    }
}
