//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Log filter directive matching the verbosity level
    ///
    /// Errors are always reported, whatever the verbosity.
    #[must_use]
    pub fn level_filter(&self) -> tracing::level_filters::LevelFilter {
        match self.verbose {
            0 => tracing::level_filters::LevelFilter::ERROR,
            1 => tracing::level_filters::LevelFilter::INFO,
            2 => tracing::level_filters::LevelFilter::DEBUG,
            _ => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// How commands reach their host and whether side effects are allowed
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Program used to reach remote hosts, invoked as `<transport> <host> <command...>`
    pub transport: String,
    /// Log commands with side effects instead of running them
    pub dry_run: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            transport: "ssh".to_string(),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let level = |verbose| {
            OutputConfig {
                verbose,
                print_summary: false,
            }
            .level_filter()
        };
        assert_eq!(level(0), tracing::level_filters::LevelFilter::ERROR);
        assert_eq!(level(1), tracing::level_filters::LevelFilter::INFO);
        assert_eq!(level(2), tracing::level_filters::LevelFilter::DEBUG);
        assert_eq!(level(3), tracing::level_filters::LevelFilter::TRACE);
        assert_eq!(level(7), tracing::level_filters::LevelFilter::TRACE);
    }
}
