use std::collections::HashMap;
use std::collections::hash_map::Entry;

use common::{CommandRunner, Effect, Host, HostCommand};
use tracing::instrument;

use crate::error::Result;

/// Every dataset and snapshot name on one host, in listing order
#[derive(Debug, Clone, Default)]
pub struct HostListing {
    pub datasets: Vec<String>,
    pub snapshots: Vec<String>,
}

/// Per-host listings, fetched on first use and kept for the rest of the run
///
/// There is no invalidation: the topology is treated as a fixed picture of
/// each host as of its first access.
#[derive(Debug, Default)]
pub struct TopologyCache {
    hosts: HashMap<Host, HostListing>,
}

impl TopologyCache {
    #[instrument(skip(self, runner))]
    pub async fn listing<R: CommandRunner>(
        &mut self,
        runner: &R,
        host: &Host,
    ) -> Result<&HostListing> {
        match self.hosts.entry(host.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                tracing::debug!("listing datasets and snapshots on {host}");
                let datasets = runner
                    .run(
                        &HostCommand::new(host.clone(), "zfs", ["list", "-H", "-o", "name"]),
                        Effect::ReadOnly,
                    )
                    .await?;
                let snapshots = runner
                    .run(
                        &HostCommand::new(
                            host.clone(),
                            "zfs",
                            ["list", "-H", "-t", "snapshot", "-o", "name"],
                        ),
                        Effect::ReadOnly,
                    )
                    .await?;
                tracing::debug!(
                    "{host}: {} datasets, {} snapshots",
                    datasets.len(),
                    snapshots.len()
                );
                Ok(entry.insert(HostListing {
                    datasets,
                    snapshots,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::FakeZfs;

    #[tokio::test]
    async fn host_is_listed_once() -> anyhow::Result<()> {
        let zfs = FakeZfs::new()
            .with_datasets("localhost", &["tank", "tank/a"])
            .with_snapshots("localhost", &["tank/a@s1"]);
        let mut cache = TopologyCache::default();
        let local = Host::local();
        let listing = cache.listing(&zfs, &local).await?;
        assert_eq!(listing.datasets, ["tank", "tank/a"]);
        assert_eq!(listing.snapshots, ["tank/a@s1"]);
        cache.listing(&zfs, &local).await?;
        assert_eq!(
            zfs.executed(),
            vec![
                "localhost: zfs list -H -o name",
                "localhost: zfs list -H -t snapshot -o name",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn hosts_are_cached_separately() -> anyhow::Result<()> {
        let zfs = FakeZfs::new()
            .with_datasets("localhost", &["tank"])
            .with_datasets("backup", &["pool2"]);
        let mut cache = TopologyCache::default();
        assert_eq!(cache.listing(&zfs, &Host::local()).await?.datasets, ["tank"]);
        assert_eq!(
            cache.listing(&zfs, &Host::new("backup")).await?.datasets,
            ["pool2"]
        );
        cache.listing(&zfs, &Host::local()).await?;
        assert_eq!(zfs.executed().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn failed_listing_is_not_cached() {
        let zfs = FakeZfs::new()
            .with_datasets("localhost", &["tank"])
            .fail_on("localhost: zfs list -H -t snapshot");
        let mut cache = TopologyCache::default();
        let error = cache.listing(&zfs, &Host::local()).await.unwrap_err();
        assert!(matches!(error, crate::Error::Transport(_)));
        let listed = zfs.executed().len();
        assert!(cache.listing(&zfs, &Host::local()).await.is_err());
        assert_eq!(zfs.executed().len(), listed + 2);
    }
}
