//! Resolution of dataset specifications to pools and datasets
//!
//! The [`Registry`] owns every pool and dataset seen during a run, together
//! with the topology cache they were built from. It is the single place
//! that creates them, so each (host, pool) pair maps to one [`Pool`] and each
//! (host, pool, path) triple to one [`Dataset`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use common::{CommandRunner, Host};
use tracing::instrument;

use crate::dataset::{Dataset, DatasetKey, Pool, PoolKey};
use crate::error::{Error, Result};
use crate::spec::DatasetSpec;
use crate::topology::TopologyCache;

#[derive(Debug, Default)]
pub struct Registry {
    topology: TopologyCache,
    pools: BTreeMap<PoolKey, Pool>,
    datasets: BTreeMap<DatasetKey, Dataset>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The unique pool for `key`, listing its host on first use
    pub async fn pool<R: CommandRunner>(&mut self, runner: &R, key: &PoolKey) -> Result<&Pool> {
        match self.pools.entry(key.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let listing = self.topology.listing(runner, &key.host).await?;
                tracing::debug!("new pool {key}");
                Ok(entry.insert(Pool::from_listing(key.clone(), listing)))
            }
        }
    }

    /// Resolve `spec` to its unique dataset
    ///
    /// With `pool`, the specification is bound to that pool: a host or pool
    /// name in `spec` that differs from it is an error, and a specification
    /// without a host inherits the pool's host.
    #[instrument(skip(self, runner))]
    pub async fn resolve<R: CommandRunner>(
        &mut self,
        runner: &R,
        spec: &str,
        pool: Option<&PoolKey>,
    ) -> Result<DatasetKey> {
        let parsed = DatasetSpec::parse(spec)?;
        if let Some(pool) = pool {
            if let Some(host) = parsed.host.as_deref() {
                if Host::new(host) != pool.host {
                    return Err(Error::specification(
                        spec,
                        format!("spec and pool specify different hosts (\"{pool}\", \"{host}\")"),
                    ));
                }
            }
            if parsed.pool != pool.name {
                return Err(Error::specification(
                    spec,
                    format!(
                        "spec and pool specify different pools (\"{}\", \"{}\")",
                        pool.name, parsed.pool
                    ),
                ));
            }
        }
        let host = match pool {
            Some(pool) if parsed.host.is_none() => pool.host.clone(),
            _ => Host::from_name(parsed.host.as_deref()),
        };
        let key = DatasetKey {
            host,
            pool: parsed.pool,
            path: parsed.path,
        };
        if self.datasets.contains_key(&key) {
            return Ok(key);
        }
        let pool = self.pool(runner, &key.pool_key()).await?;
        let dataset = Dataset::from_pool(key.clone(), pool);
        tracing::debug!(
            "new dataset {key} with {} snapshots",
            dataset.snapshots.len()
        );
        self.datasets.insert(key.clone(), dataset);
        Ok(key)
    }

    pub fn dataset(&self, key: &DatasetKey) -> Result<&Dataset> {
        self.datasets.get(key).ok_or_else(|| unresolved(key))
    }

    pub fn dataset_mut(&mut self, key: &DatasetKey) -> Result<&mut Dataset> {
        self.datasets.get_mut(key).ok_or_else(|| unresolved(key))
    }
}

fn unresolved(key: &DatasetKey) -> Error {
    Error::NotFound {
        host: key.host.to_string(),
        dataset: key.full_name(),
    }
}
