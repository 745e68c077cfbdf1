use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "zfssync",
    version,
    about = "Sync one or more ZFS datasets to another pool using incremental snapshot streams",
    long_about = "`zfssync` brings destination datasets up to date with their sources by sending
every snapshot after the newest one both sides have in common.

Datasets are given as [host:]pool[/path]. A source `pool/path` lands at
`<destination-pool>/path` on the destination's host; the destination's own
path is not used. Hosts other than
localhost are reached through the transport program (ssh by default).

EXAMPLE:
    # Snapshot all home datasets and replicate them to a backup host
    zfssync -s -r tank/home backup:pool2

Note: the receiving side runs `zfs recv -F`, which rolls back destination
changes made after the common snapshot."
)]
struct Args {
    // Sync options
    /// Continue with the next source or dataset after an error
    #[arg(short = 'c', long = "continue", help_heading = "Sync options")]
    continue_on_error: bool,

    /// Treat the dataset part of each source as a shell glob pattern
    ///
    /// `*` and `?` also match `/`, and `[...]` / `[!...]` are character classes.
    /// Braces match themselves and an unclosed `[` is an error. The pool name is
    /// never a pattern.
    #[arg(short = 'g', long, help_heading = "Sync options")]
    glob: bool,

    /// Include all descendants of each source dataset
    #[arg(short = 'r', long, help_heading = "Sync options")]
    recursive: bool,

    /// Create a snapshot named after the current UTC time (YYYYMMDDhhmm) on every source first
    #[arg(short = 's', long, help_heading = "Sync options")]
    snapshot: bool,

    /// Show the commands that would change anything instead of running them
    ///
    /// Listings still run, so the plan is the same as for a real run.
    #[arg(short = 'n', long, visible_alias = "notreally", help_heading = "Sync options")]
    dry_run: bool,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    // Advanced settings
    /// Program used to run commands on remote hosts, invoked as `<PROGRAM> <host> <command...>`
    #[arg(
        long,
        default_value = "ssh",
        value_name = "PROGRAM",
        help_heading = "Advanced settings"
    )]
    transport: String,

    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    // ARGUMENTS
    /// Source dataset(s) followed by the destination dataset
    #[arg(value_name = "SOURCE... DESTINATION")]
    datasets: Vec<String>,
}

#[instrument]
async fn async_main(args: Args) -> Result<zfssync::Summary> {
    let Some((destination, sources)) = args.datasets.split_last() else {
        return Err(anyhow!("at least one source and a destination are required"));
    };
    if sources.is_empty() {
        return Err(anyhow!(
            "at least one source and a destination are required, got only \"{destination}\""
        ));
    }
    let runner = common::ShellRunner::new(common::RunnerConfig {
        transport: args.transport.clone(),
        dry_run: args.dry_run,
    });
    let options = zfssync::Options {
        continue_on_error: args.continue_on_error,
        glob: args.glob,
        recursive: args.recursive,
        snapshot_label: args
            .snapshot
            .then(|| zfssync::sync::snapshot_label(chrono::Utc::now())),
    };
    match zfssync::orchestrator::run(&runner, sources, destination, &options).await {
        Ok(summary) => Ok(summary),
        Err(error) => {
            if args.summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
