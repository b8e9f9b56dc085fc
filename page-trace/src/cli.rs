use std::path::PathBuf;

use bpaf::{batteries::verbose_by_slice, construct, long, OptionParser, Parser, ShellComp};
use engine::page_allocator::PageAllocatorSettings;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity_level: LevelFilter,
    pub page_count: Option<u32>,
    pub head_insertion_threshold: u32,
    pub validate: bool,
    pub dump: bool,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Replay {
        trace: PathBuf,
    },
    Stress {
        seed: u64,
        operations: u32,
        max_request: u32,
        save_trace: Option<PathBuf>,
    },
}

pub fn options() -> OptionParser<Options> {
    let verbosity_level = verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    );

    let page_count = long("pages")
        .help("Overrides the page count of the trace (default for stress runs: 512)")
        .argument::<u32>("PAGES")
        .optional();

    let head_insertion_threshold = long("threshold")
        .help("Freed spans at least this long are put at the front of the free list")
        .argument::<u32>("PAGES")
        .fallback(PageAllocatorSettings::default().head_insertion_threshold)
        .display_fallback();

    let validate = long("validate")
        .help("Checks the allocator's invariants after every operation")
        .switch();

    let dump = long("dump")
        .help("Prints out the free list after the last operation")
        .switch();

    let command = construct!([replay(), stress()]);

    construct!(Options {
        verbosity_level,
        page_count,
        head_insertion_threshold,
        validate,
        dump,
        command,
    })
    .to_options()
    .descr("Runs allocation traces through the engine's page allocator")
}

fn replay() -> impl Parser<Command> {
    let trace = long("trace")
        .help("The trace file to replay")
        .argument::<PathBuf>("FILE")
        .complete_shell(ShellComp::File {
            mask: Some("*.json"),
        });

    construct!(Command::Replay { trace })
        .to_options()
        .descr("Replays the allocations and frees of a trace file")
        .command("replay")
}

fn stress() -> impl Parser<Command> {
    let seed = long("seed")
        .help("Seed for the random operations")
        .argument::<u64>("SEED")
        .fallback(0)
        .display_fallback();

    let operations = long("operations")
        .help("The amount of operations to run")
        .argument::<u32>("COUNT")
        .fallback(10_000)
        .display_fallback();

    let max_request = long("max-request")
        .help("The maximum amount of pages requested by one allocation")
        .argument::<u32>("PAGES")
        .fallback(64)
        .display_fallback();

    let save_trace = long("save-trace")
        .help("Writes the generated operations into a trace file for replaying later")
        .argument::<PathBuf>("FILE")
        .optional();

    construct!(Command::Stress {
        seed,
        operations,
        max_request,
        save_trace,
    })
    .to_options()
    .descr("Runs randomly generated allocations and frees")
    .command("stress")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracing::level_filters::LevelFilter;

    use super::{options, Command};

    #[test]
    fn check_bpaf_invariants() {
        options().check_invariants(true);
    }

    #[test]
    fn parses_global_options_and_subcommands() {
        let parsed = options()
            .run_inner(&["-v", "--pages", "16", "--validate", "replay", "--trace", "t.json"])
            .unwrap();
        assert_eq!(LevelFilter::DEBUG, parsed.verbosity_level);
        assert_eq!(Some(16), parsed.page_count);
        assert_eq!(24, parsed.head_insertion_threshold);
        assert!(parsed.validate);
        assert!(!parsed.dump);
        assert_eq!(
            Command::Replay {
                trace: PathBuf::from("t.json"),
            },
            parsed.command,
        );

        let parsed = options()
            .run_inner(&["--threshold", "8", "stress", "--seed", "3"])
            .unwrap();
        assert_eq!(None, parsed.page_count);
        assert_eq!(8, parsed.head_insertion_threshold);
        assert_eq!(
            Command::Stress {
                seed: 3,
                operations: 10_000,
                max_request: 64,
                save_trace: None,
            },
            parsed.command,
        );
    }
}
