// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod platform;
mod replay;
mod stress;
mod trace;

use anyhow::Context;
use engine::page_allocator::PageAllocatorSettings;
use tracing::{info, warn};

use crate::{
    cli::Command,
    platform::StdPlatform,
    replay::ReplayOptions,
    trace::{Operation, TraceFile},
};

fn main() -> anyhow::Result<()> {
    let options = cli::options().run();

    tracing_subscriber::fmt()
        .with_max_level(options.verbosity_level)
        .with_writer(std::io::stderr)
        .init();

    let (page_count, operations): (u32, Vec<Operation>) = match &options.command {
        Command::Replay { trace } => {
            let TraceFile::V1 {
                page_count,
                operations,
            } = trace::read(trace)?;
            info!(
                "Replaying {} operations from {}.",
                operations.len(),
                trace.display(),
            );
            (options.page_count.unwrap_or(page_count), operations)
        }

        Command::Stress {
            seed,
            operations,
            max_request,
            save_trace,
        } => {
            let page_count = options
                .page_count
                .unwrap_or(PageAllocatorSettings::default().page_count);
            let operations = stress::generate(*seed, *operations, *max_request);
            if let Some(path) = save_trace {
                let trace = TraceFile::V1 {
                    page_count,
                    operations,
                };
                trace::write(path, &trace)?;
                info!("Wrote the generated operations to {}.", path.display());
                let TraceFile::V1 { operations, .. } = trace;
                (page_count, operations)
            } else {
                (page_count, operations)
            }
        }
    };

    let settings = PageAllocatorSettings {
        page_count,
        head_insertion_threshold: options.head_insertion_threshold,
    };
    let replay_options = ReplayOptions {
        validate: options.validate,
        dump: options.dump,
    };
    let report = replay::run(&StdPlatform, settings, &operations, replay_options)?;

    if report.failed_allocations > 0 {
        warn!(
            "{} of {} allocations failed due to running out of pages.",
            report.failed_allocations,
            report.failed_allocations + report.successful_allocations,
        );
    }

    let report = serde_json::to_string_pretty(&report).context("Failed to serialize the report")?;
    println!("{report}");

    Ok(())
}
