//! Runs a whole sync: every source against one destination
//!
//! Failures of individual sources or datasets are either fatal or logged and
//! skipped, depending on [`Options::continue_on_error`]. Either way a run with
//! any failure ends in an [`Error`] that carries the partial [`Summary`].

use std::collections::BTreeSet;

use common::CommandRunner;
use tracing::instrument;

use crate::dataset::DatasetKey;
use crate::resolver::Registry;
use crate::source::{self, ExpandOptions, SourceSet};
use crate::sync::{Created, Engine, TransferPlan};

/// Error type for a sync run, carrying the work done before it failed
///
/// Log it with `{:#}` to see the whole error chain.
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Log and skip failing sources and datasets instead of stopping
    pub continue_on_error: bool,
    pub glob: bool,
    pub recursive: bool,
    /// Create `<dataset>@<label>` on every source dataset before transferring
    pub snapshot_label: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub sources_resolved: usize,
    pub snapshots_created: usize,
    pub snapshots_existing: usize,
    pub datasets_in_sync: usize,
    pub incremental_transfers: usize,
    pub full_transfers: usize,
    pub errors: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            sources_resolved: self.sources_resolved + other.sources_resolved,
            snapshots_created: self.snapshots_created + other.snapshots_created,
            snapshots_existing: self.snapshots_existing + other.snapshots_existing,
            datasets_in_sync: self.datasets_in_sync + other.datasets_in_sync,
            incremental_transfers: self.incremental_transfers + other.incremental_transfers,
            full_transfers: self.full_transfers + other.full_transfers,
            errors: self.errors + other.errors,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "sources resolved: {}\n\
            snapshots created: {}\n\
            snapshots existing: {}\n\
            datasets in sync: {}\n\
            incremental transfers: {}\n\
            full transfers: {}\n\
            errors: {}",
            self.sources_resolved,
            self.snapshots_created,
            self.snapshots_existing,
            self.datasets_in_sync,
            self.incremental_transfers,
            self.full_transfers,
            self.errors,
        )
    }
}

impl Summary {
    fn transferred(plan: &TransferPlan) -> Self {
        match plan {
            TransferPlan::InSync { .. } => Self {
                datasets_in_sync: 1,
                ..Default::default()
            },
            TransferPlan::Incremental { .. } => Self {
                incremental_transfers: 1,
                ..Default::default()
            },
            TransferPlan::Full { .. } => Self {
                full_transfers: 1,
                ..Default::default()
            },
        }
    }

    fn snapshot(created: &Created) -> Self {
        match created {
            Created::New(_) => Self {
                snapshots_created: 1,
                ..Default::default()
            },
            Created::Existing(_) => Self {
                snapshots_existing: 1,
                ..Default::default()
            },
        }
    }
}

/// Applies the error policy: `Ok` to carry on, `Err` to stop the run
fn handle_failure(
    error: crate::Error,
    summary: &mut Summary,
    options: &Options,
) -> Result<(), Error> {
    summary.errors += 1;
    if options.continue_on_error {
        tracing::error!("{:#}", error);
        return Ok(());
    }
    Err(Error::new(error.into(), *summary))
}

/// Sync every dataset selected by `sources` to `destination`
#[instrument(skip(runner))]
pub async fn run<R: CommandRunner>(
    runner: &R,
    sources: &[String],
    destination: &str,
    options: &Options,
) -> Result<Summary, Error> {
    let mut summary = Summary::default();
    let mut registry = Registry::new();
    let destination = match registry.resolve(runner, destination, None).await {
        Ok(destination) => destination,
        Err(error) => {
            summary.errors += 1;
            return Err(Error::new(
                anyhow::Error::from(error).context("failed to resolve destination"),
                summary,
            ));
        }
    };
    let expand_options = ExpandOptions {
        glob: options.glob,
        recursive: options.recursive,
    };
    let mut source_sets: Vec<SourceSet> = Vec::with_capacity(sources.len());
    for spec in sources {
        match source::expand(&mut registry, runner, spec, expand_options).await {
            Ok(set) => {
                summary.sources_resolved += 1;
                source_sets.push(set);
            }
            Err(error) => handle_failure(error, &mut summary, options)?,
        }
    }
    let mut engine = Engine::new(&mut registry, runner);
    if let Some(label) = &options.snapshot_label {
        let mut stamped: BTreeSet<&DatasetKey> = BTreeSet::new();
        for dataset in source_sets.iter().flat_map(|set| set.datasets.iter()) {
            if !stamped.insert(dataset) {
                continue;
            }
            match engine.create_snapshot(dataset, label).await {
                Ok(created) => summary = summary + Summary::snapshot(&created),
                Err(error) => handle_failure(error, &mut summary, options)?,
            }
        }
    }
    let mut synced: BTreeSet<&DatasetKey> = BTreeSet::new();
    for dataset in source_sets.iter().flat_map(|set| set.datasets.iter()) {
        if !synced.insert(dataset) {
            tracing::debug!("{dataset} was already synced");
            continue;
        }
        match engine.sync(dataset, &destination).await {
            Ok(plan) => summary = summary + Summary::transferred(&plan),
            Err(error) => handle_failure(error, &mut summary, options)?,
        }
    }
    if summary.errors > 0 {
        return Err(Error::new(
            anyhow::anyhow!("{} of the requested operations failed", summary.errors),
            summary,
        ));
    }
    Ok(summary)
}
