//! Shared plumbing for the zfssync tools
//!
//! - [`command`]: issuing commands on local and remote hosts
//! - [`config`]: runtime and output settings
//! - [`run`]: runtime and logging bootstrap for binaries

pub mod command;
pub mod config;

pub use command::{CommandError, CommandRunner, Effect, Host, HostCommand, ShellRunner};
pub use config::{OutputConfig, RunnerConfig, RuntimeConfig};

fn init_logging(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(output.level_filter().into())
        .from_env_lossy();
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("failed to initialize logging: {error}");
    }
}

/// Runs `func` on a tokio runtime with logging configured from `output`
///
/// Returns `None` if the runtime could not be started or `func` failed; the
/// error is logged at ERROR level, which is always enabled. On success the
/// summary is printed to stdout when requested.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_logging(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start tokio runtime: {error}");
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
