//! Registry of the shards set up on this node

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ShardError, ShardIndex, ShardResult, ShardSummary};
use crate::config::{DownsampleConfig, StoreConfig};
use crate::dataset::{DatasetRef, ShardNumber};
use crate::store::{ColumnStore, Schema, StoreResult};

type ShardTable = DashMap<ShardNumber, Arc<ShardIndex>>;

/// Concurrent dataset -> shard -> [`ShardIndex`] table
///
/// Lookups never block on setup or removal of other keys. A dataset's shard
/// table is created on its first setup and kept for the registry's lifetime.
pub struct ShardRegistry {
    datasets: DashMap<DatasetRef, Arc<ShardTable>>,
    /// Keys that were set up and later removed from this node
    removed: DashSet<(DatasetRef, ShardNumber)>,
    store: Arc<dyn ColumnStore>,
    shutdown: CancellationToken,
}

impl ShardRegistry {
    /// Create an empty registry over a backing store
    pub fn new(store: Arc<dyn ColumnStore>, shutdown: CancellationToken) -> Self {
        Self {
            datasets: DashMap::new(),
            removed: DashSet::new(),
            store,
            shutdown,
        }
    }

    /// Backing store shared by every shard
    pub fn store(&self) -> &Arc<dyn ColumnStore> {
        &self.store
    }

    fn table(&self, dataset: &DatasetRef) -> Arc<ShardTable> {
        if let Some(table) = self.datasets.get(dataset) {
            return table.clone();
        }
        self.datasets
            .entry(dataset.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }

    /// Create and register the index of a shard
    ///
    /// Fails with [`ShardError::AlreadySetup`] if the shard is registered;
    /// of two racing calls for one key exactly one succeeds.
    pub fn setup(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        schema: Schema,
        store_config: StoreConfig,
        downsample_config: DownsampleConfig,
    ) -> ShardResult<Arc<ShardIndex>> {
        let table = self.table(dataset);
        let index = match table.entry(shard) {
            Entry::Occupied(_) => {
                warn!(dataset = %dataset, shard, "Shard is already set up");
                return Err(ShardError::already_setup(dataset.clone(), shard));
            }
            Entry::Vacant(vacant) => {
                let index = Arc::new(ShardIndex::new(
                    dataset.clone(),
                    shard,
                    schema,
                    store_config,
                    downsample_config,
                    self.store.clone(),
                    self.shutdown.child_token(),
                ));
                vacant.insert(index.clone());
                index
            }
        };

        self.removed.remove(&(dataset.clone(), shard));
        info!(dataset = %dataset, shard, instance_id = index.instance_id(), "Set up shard");
        Ok(index)
    }

    /// Registered index of a shard, if any
    pub fn get_shard(&self, dataset: &DatasetRef, shard: ShardNumber) -> Option<Arc<ShardIndex>> {
        let table = self.datasets.get(dataset)?.clone();
        let index = table.get(&shard)?.clone();
        Some(index)
    }

    /// Registered index of a shard
    ///
    /// Fails with [`ShardError::NotAssigned`] if the shard was set up here and
    /// removed since, [`ShardError::NotSetUp`] otherwise.
    pub fn get_shard_or_fail(&self, dataset: &DatasetRef, shard: ShardNumber) -> ShardResult<Arc<ShardIndex>> {
        match self.get_shard(dataset, shard) {
            Some(index) => Ok(index),
            None if self.removed.contains(&(dataset.clone(), shard)) => {
                Err(ShardError::not_assigned(dataset.clone(), shard))
            }
            None => Err(ShardError::not_setup(dataset.clone(), shard)),
        }
    }

    /// Shard numbers registered for a dataset at the time of the call
    pub fn active_shards(&self, dataset: &DatasetRef) -> Vec<ShardNumber> {
        let Some(table) = self.datasets.get(dataset).map(|t| t.clone()) else {
            return Vec::new();
        };
        let mut shards: Vec<ShardNumber> = table.iter().map(|entry| *entry.key()).collect();
        shards.sort_unstable();
        shards
    }

    /// Datasets with a shard table on this node
    pub fn datasets(&self) -> Vec<DatasetRef> {
        let mut datasets: Vec<DatasetRef> = self.datasets.iter().map(|entry| entry.key().clone()).collect();
        datasets.sort();
        datasets
    }

    /// Remove a shard if `expected` is the registered instance
    ///
    /// A teardown that arrives after the shard was set up again holds a stale
    /// instance and leaves the new one in place.
    pub fn remove_shard(&self, dataset: &DatasetRef, shard: ShardNumber, expected: &Arc<ShardIndex>) -> bool {
        let Some(table) = self.datasets.get(dataset).map(|t| t.clone()) else {
            return false;
        };

        let removed = table
            .remove_if(&shard, |_, current| Arc::ptr_eq(current, expected))
            .is_some();

        if removed {
            self.removed.insert((dataset.clone(), shard));
            info!(dataset = %dataset, shard, instance_id = expected.instance_id(), "Removed shard");
        } else {
            debug!(
                dataset = %dataset,
                shard,
                instance_id = expected.instance_id(),
                "Ignored removal of stale shard instance"
            );
        }
        removed
    }

    /// Statistics of every registered shard
    pub fn summary(&self) -> ShardSummary {
        let mut summary = ShardSummary::new();
        for table in self.datasets.iter() {
            for index in table.iter() {
                summary.add(&index.shard_stats());
            }
        }
        summary
    }

    /// Drop every registration and reset the backing store
    ///
    /// Administrative use only; callers must ensure no queries are in flight.
    pub async fn reset(&self) -> StoreResult<()> {
        self.datasets.clear();
        self.removed.clear();
        info!("Reset shard registry");
        self.store.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryColumnStore;

    fn registry() -> (ShardRegistry, MemoryColumnStore) {
        let store = MemoryColumnStore::new();
        let registry = ShardRegistry::new(Arc::new(store.clone()), CancellationToken::new());
        (registry, store)
    }

    fn setup(registry: &ShardRegistry, dataset: &DatasetRef, shard: ShardNumber) -> ShardResult<Arc<ShardIndex>> {
        registry.setup(dataset, shard, Schema::gauge(), StoreConfig::default(), DownsampleConfig::default())
    }

    #[test]
    fn test_setup_and_lookup() {
        let (registry, _) = registry();
        let ds = DatasetRef::new("metrics_ds_5");

        let index = setup(&registry, &ds, 3).unwrap();
        let found = registry.get_shard(&ds, 3).unwrap();
        assert!(Arc::ptr_eq(&index, &found));

        let err = setup(&registry, &ds, 3).unwrap_err();
        assert!(err.is_already_setup());
        assert!(Arc::ptr_eq(&registry.get_shard(&ds, 3).unwrap(), &index));
    }

    #[test]
    fn test_unknown_shards() {
        let (registry, _) = registry();
        let ds = DatasetRef::new("metrics_ds_5");

        assert!(registry.get_shard(&ds, 0).is_none());
        assert!(matches!(registry.get_shard_or_fail(&ds, 0), Err(ShardError::NotSetUp { .. })));

        setup(&registry, &ds, 1).unwrap();
        assert!(registry.get_shard(&ds, 0).is_none());
        assert!(registry.get_shard(&DatasetRef::new("other"), 1).is_none());
    }

    #[test]
    fn test_compare_and_remove() {
        let (registry, _) = registry();
        let ds = DatasetRef::new("metrics_ds_5");

        let first = setup(&registry, &ds, 0).unwrap();
        assert!(registry.remove_shard(&ds, 0, &first));
        assert!(matches!(registry.get_shard_or_fail(&ds, 0), Err(ShardError::NotAssigned { .. })));

        // Reassigned back; a late teardown of the first instance must not remove it
        let second = setup(&registry, &ds, 0).unwrap();
        assert_ne!(first.instance_id(), second.instance_id());
        assert!(!registry.remove_shard(&ds, 0, &first));
        assert!(Arc::ptr_eq(&registry.get_shard(&ds, 0).unwrap(), &second));

        assert!(registry.remove_shard(&ds, 0, &second));
        assert!(!registry.remove_shard(&ds, 0, &second));
        assert!(!registry.remove_shard(&DatasetRef::new("other"), 0, &second));
    }

    #[test]
    fn test_active_shards() {
        let (registry, _) = registry();
        let ds = DatasetRef::new("metrics_ds_5");
        assert!(registry.active_shards(&ds).is_empty());

        for shard in [4, 1, 2] {
            setup(&registry, &ds, shard).unwrap();
        }
        assert_eq!(registry.active_shards(&ds), vec![1, 2, 4]);

        let index = registry.get_shard(&ds, 2).unwrap();
        registry.remove_shard(&ds, 2, &index);
        assert_eq!(registry.active_shards(&ds), vec![1, 4]);
        assert_eq!(registry.datasets(), vec![ds]);
        assert_eq!(registry.summary().shard_count, 2);
    }

    #[tokio::test]
    async fn test_reset() {
        let (registry, store) = registry();
        let ds = DatasetRef::new("metrics_ds_5");
        let index = setup(&registry, &ds, 0).unwrap();
        registry.remove_shard(&ds, 0, &index);
        setup(&registry, &ds, 1).unwrap();

        registry.reset().await.unwrap();
        assert!(registry.get_shard(&ds, 1).is_none());
        assert!(registry.active_shards(&ds).is_empty());
        assert!(matches!(registry.get_shard_or_fail(&ds, 0), Err(ShardError::NotSetUp { .. })));
        assert_eq!(store.reset_count(), 1);
    }
}
