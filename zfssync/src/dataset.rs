//! Pools, datasets and the keys that identify them
//!
//! Identity is structural: two datasets are the same entity iff host, pool and
//! path are equal. Keys order by host, then pool, then path, so a parent dataset
//! always sorts before its children.

use common::Host;

use crate::topology::HostListing;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub host: Host,
    pub name: String,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    pub host: Host,
    pub pool: String,
    /// Empty for the pool's root dataset, otherwise starts with `/`
    pub path: String,
}

impl DatasetKey {
    #[must_use]
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            host: self.host.clone(),
            name: self.pool.clone(),
        }
    }

    /// Dataset name as the storage engine knows it
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}{}", self.pool, self.path)
    }

    #[must_use]
    pub fn snapshot_name(&self, id: &str) -> String {
        format!("{}{}@{}", self.pool, self.path, id)
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.pool, self.path)
    }
}

fn in_pool(name: &str, pool: &str) -> bool {
    match name.strip_prefix(pool) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('@'),
        None => false,
    }
}

/// A top-level storage namespace on one host
#[derive(Debug, Clone)]
pub struct Pool {
    pub key: PoolKey,
    /// Full names of the pool's datasets, in listing order
    pub datasets: Vec<String>,
    /// Full names of the pool's snapshots, in listing order
    pub snapshots: Vec<String>,
}

impl Pool {
    /// The part of a host listing that belongs to this pool
    #[must_use]
    pub fn from_listing(key: PoolKey, listing: &HostListing) -> Self {
        let select = |names: &[String]| {
            names
                .iter()
                .filter(|name| in_pool(name, &key.name))
                .cloned()
                .collect::<Vec<_>>()
        };
        let datasets = select(&listing.datasets);
        let snapshots = select(&listing.snapshots);
        Self {
            key,
            datasets,
            snapshots,
        }
    }

    #[must_use]
    pub fn has_dataset(&self, full_name: &str) -> bool {
        self.datasets.iter().any(|name| name == full_name)
    }
}

/// A dataset and its snapshot history
///
/// Snapshots keep the order of the host listing, which is taken to be
/// creation order: the last entry is the most recent snapshot. Nothing here
/// re-sorts them.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub key: DatasetKey,
    /// Full snapshot names, `<dataset>@<id>`
    pub snapshots: Vec<String>,
}

impl Dataset {
    #[must_use]
    pub fn new(key: DatasetKey, snapshots: Vec<String>) -> Self {
        Self { key, snapshots }
    }

    /// The dataset's own snapshots out of its pool's listing
    #[must_use]
    pub fn from_pool(key: DatasetKey, pool: &Pool) -> Self {
        let prefix = format!("{}@", key.full_name());
        let snapshots = pool
            .snapshots
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();
        Self::new(key, snapshots)
    }

    /// Snapshot identifiers, oldest first
    pub fn snapshot_ids(&self) -> impl Iterator<Item = &str> {
        let prefix_len = self.key.full_name().len() + 1;
        self.snapshots
            .iter()
            .filter_map(move |name| name.get(prefix_len..))
    }

    #[must_use]
    pub fn latest_snapshot_id(&self) -> Option<&str> {
        self.snapshot_ids().last()
    }

    #[must_use]
    pub fn has_snapshot_id(&self, id: &str) -> bool {
        self.snapshot_ids().any(|candidate| candidate == id)
    }

    pub fn push_snapshot(&mut self, full_name: String) {
        self.snapshots.push(full_name);
    }
}
