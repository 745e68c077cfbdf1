//! Snapshot alignment and transfer
//!
//! For each source dataset the engine finds the newest snapshot that the
//! destination already has (the baseline) and sends everything after it. The
//! destination's latest snapshot must exist on the source; anything else means
//! the histories diverged and the dataset is left alone.
//!
//! Snapshot listings are taken to be in creation order, with the latest
//! snapshot last. The storage engine lists them that way; nothing here sorts.

use common::{CommandRunner, Effect, HostCommand};
use tracing::instrument;

use crate::dataset::{Dataset, DatasetKey};
use crate::error::{Error, Result};
use crate::resolver::Registry;

/// Label for snapshots created at `now`, e.g. `202401311530`
#[must_use]
pub fn snapshot_label(now: chrono::DateTime<chrono::Utc>) -> String {
    now.format("%Y%m%d%H%M").to_string()
}

/// Result of [`Engine::create_snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    New(String),
    Existing(String),
}

/// What a sync has to do to bring the destination up to the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPlan {
    /// Both sides end at `snapshot`
    InSync { snapshot: String },
    /// Send the snapshots after `from` up to and including `to`
    Incremental { from: String, to: String },
    /// Destination has no snapshots, send `to` as a complete stream
    Full { to: String },
}

impl TransferPlan {
    /// Arguments of the send command, or `None` if nothing is sent
    #[must_use]
    pub fn send_args(&self, source: &DatasetKey) -> Option<Vec<String>> {
        match self {
            TransferPlan::InSync { .. } => None,
            TransferPlan::Incremental { from, to } => Some(vec![
                "send".to_string(),
                "-p".to_string(),
                "-I".to_string(),
                format!("@{from}"),
                source.snapshot_name(to),
            ]),
            TransferPlan::Full { to } => Some(vec![
                "send".to_string(),
                "-p".to_string(),
                source.snapshot_name(to),
            ]),
        }
    }
}

/// Newest snapshot identifier shared by `source` and `destination`
///
/// `None` means the destination is empty and needs a full stream. The
/// destination's latest snapshot has to exist on the source, otherwise the
/// source cannot prove the destination derives from it.
pub fn compute_baseline(source: &Dataset, destination: &Dataset) -> Result<Option<String>> {
    if source.snapshots.is_empty() {
        return Err(Error::Precondition {
            dataset: source.key.to_string(),
        });
    }
    let Some(latest) = destination.latest_snapshot_id() else {
        return Ok(None);
    };
    if !source.has_snapshot_id(latest) {
        return Err(Error::Divergence {
            snapshot: latest.to_string(),
            source_dataset: source.key.to_string(),
        });
    }
    Ok(Some(latest.to_string()))
}

pub fn plan(source: &Dataset, destination: &Dataset) -> Result<TransferPlan> {
    let baseline = compute_baseline(source, destination)?;
    let target = source
        .latest_snapshot_id()
        .ok_or_else(|| Error::Precondition {
            dataset: source.key.to_string(),
        })?
        .to_string();
    Ok(match baseline {
        Some(baseline) if baseline == target => TransferPlan::InSync { snapshot: target },
        Some(baseline) => TransferPlan::Incremental {
            from: baseline,
            to: target,
        },
        None => TransferPlan::Full { to: target },
    })
}

/// Where `source` lands on the destination's host
///
/// The source keeps its path within its pool and moves to the destination's
/// pool. The destination root's own path does not take part.
#[must_use]
pub fn destination_name(source: &DatasetKey, destination_root: &DatasetKey) -> String {
    format!("{}{}", destination_root.pool, source.path)
}

/// Issues snapshot and transfer commands for resolved datasets
pub struct Engine<'a, R> {
    registry: &'a mut Registry,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Engine<'a, R> {
    pub fn new(registry: &'a mut Registry, runner: &'a R) -> Self {
        Self { registry, runner }
    }

    /// Create `<dataset>@<label>` unless it already exists
    ///
    /// The new snapshot is recorded on the dataset right away, also in
    /// dry-run mode, so later planning in this run takes it into account.
    #[instrument(skip(self))]
    pub async fn create_snapshot(&mut self, dataset: &DatasetKey, label: &str) -> Result<Created> {
        let name = dataset.snapshot_name(label);
        if self.registry.dataset(dataset)?.snapshots.contains(&name) {
            tracing::debug!("snap: {}:{name} exists already", dataset.host);
            return Ok(Created::Existing(name));
        }
        tracing::info!("snap: {}:{name}", dataset.host);
        self.runner
            .run(
                &HostCommand::new(dataset.host.clone(), "zfs", ["snapshot", name.as_str()]),
                Effect::Mutating,
            )
            .await?;
        self.registry.dataset_mut(dataset)?.push_snapshot(name.clone());
        Ok(Created::New(name))
    }

    /// Resolve the dataset `source` maps to under `destination_root`
    pub async fn destination_of(
        &mut self,
        source: &DatasetKey,
        destination_root: &DatasetKey,
    ) -> Result<DatasetKey> {
        let name = destination_name(source, destination_root);
        self.registry
            .resolve(self.runner, &name, Some(&destination_root.pool_key()))
            .await
    }

    /// Bring the destination counterpart of `source` up to the source's latest snapshot
    #[instrument(skip(self))]
    pub async fn sync(
        &mut self,
        source: &DatasetKey,
        destination_root: &DatasetKey,
    ) -> Result<TransferPlan> {
        let destination = self.destination_of(source, destination_root).await?;
        let plan = plan(
            self.registry.dataset(source)?,
            self.registry.dataset(&destination)?,
        )?;
        match &plan {
            TransferPlan::InSync { .. } => {
                tracing::info!("sync: {source} -> {destination}: datasets are in sync");
            }
            TransferPlan::Incremental { from, to } => {
                tracing::info!(
                    "sync: {source} -> {destination}: syncing snapshots from {from} to {to}"
                );
            }
            TransferPlan::Full { to } => {
                tracing::info!("sync: {source} -> {destination}: syncing all snapshots up to {to}");
            }
        }
        if let Some(send_args) = plan.send_args(source) {
            let sender = HostCommand::new(source.host.clone(), "zfs", send_args);
            let receiver = HostCommand::new(
                destination.host.clone(),
                "zfs",
                ["recv".to_string(), "-F".to_string(), destination.full_name()],
            );
            self.runner
                .run_piped(&sender, &receiver, Effect::Mutating)
                .await
                .map_err(|error| Error::Transfer {
                    source_dataset: source.to_string(),
                    destination: destination.to_string(),
                    error,
                })?;
        }
        Ok(plan)
    }
}
