//! Dispatch of shard-scoped queries to the owning [`ShardIndex`]

use std::sync::Arc;

use tracing::debug;

use crate::dataset::{DatasetRef, ShardNumber};
use crate::filter::LabelFilter;
use crate::index::{LabelValuesIter, PartKeyIter};
use crate::query::{ChunkScanMethod, PartLookupResult, PartitionScanMethod, ScanSplit, TermInfo, TimeRange};
use crate::shard::{PartitionIter, ShardIndex, ShardRegistry, ShardResult, ShardStats};

/// Routes queries to the shards registered on this node
///
/// A shard missing from the registry fails with
/// [`ShardError::NotAssigned`](crate::shard::ShardError::NotAssigned) when it
/// was reassigned away and
/// [`ShardError::NotSetUp`](crate::shard::ShardError::NotSetUp) when it was
/// never set up here.
#[derive(Clone)]
pub struct QueryRouter {
    registry: Arc<ShardRegistry>,
}

impl QueryRouter {
    pub fn new(registry: Arc<ShardRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    fn shard(&self, dataset: &DatasetRef, shard: ShardNumber) -> ShardResult<Arc<ShardIndex>> {
        self.registry.get_shard_or_fail(dataset, shard).map_err(|err| {
            debug!(dataset = %dataset, shard, error = %err, "Shard query rejected");
            err
        })
    }

    /// Resolve a scan method on the shard it is addressed to
    pub fn lookup_partitions(
        &self,
        dataset: &DatasetRef,
        method: &PartitionScanMethod,
        chunk_method: ChunkScanMethod,
    ) -> ShardResult<PartLookupResult> {
        self.shard(dataset, method.shard())?
            .lookup_partitions(method, chunk_method)
    }

    /// Stream a lookup result from `shard`
    ///
    /// Fails if the lookup was produced for a different shard.
    pub fn scan_partitions(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        lookup: &PartLookupResult,
    ) -> ShardResult<PartitionIter> {
        self.shard(dataset, shard)?.scan_partitions(lookup)
    }

    pub fn label_values(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        label: &str,
        top_k: usize,
    ) -> ShardResult<Vec<TermInfo>> {
        self.shard(dataset, shard)?.label_values(label, top_k)
    }

    pub fn label_values_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        label_names: Vec<String>,
        range: TimeRange,
        limit: usize,
    ) -> ShardResult<LabelValuesIter> {
        self.shard(dataset, shard)?
            .label_values_with_filters(filters, label_names, range, limit)
    }

    pub fn part_keys_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        range: TimeRange,
        limit: usize,
    ) -> ShardResult<PartKeyIter> {
        self.shard(dataset, shard)?
            .part_keys_with_filters(filters, range, limit)
    }

    pub fn index_names(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        limit: usize,
    ) -> ShardResult<Vec<(String, ShardNumber)>> {
        self.shard(dataset, shard)?.index_names(limit)
    }

    /// Statistics of one shard
    pub fn shard_metrics(&self, dataset: &DatasetRef, shard: ShardNumber) -> ShardResult<ShardStats> {
        Ok(self.shard(dataset, shard)?.shard_stats())
    }

    /// One split per shard currently registered for the dataset
    pub fn get_scan_splits(&self, dataset: &DatasetRef) -> Vec<ScanSplit> {
        self.registry
            .active_shards(dataset)
            .into_iter()
            .map(|shard| ScanSplit { shard })
            .collect()
    }
}
