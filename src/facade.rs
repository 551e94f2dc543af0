//! Store facade over the downsampled datasets served by this node
//!
//! [`ReadableTimeSeriesStore`] is the read-only capability: it has no write
//! methods, so code holding one cannot ingest. [`TimeSeriesStore`] is the full
//! store contract shared with the raw store; this implementation rejects
//! every write with [`Error::Unsupported`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DownsampleConfig, StoreConfig};
use crate::dataset::{downsample_dataset_ref, DatasetRef, ShardNumber};
use crate::error::{Error, Result};
use crate::filter::LabelFilter;
use crate::index::{LabelValuesIter, PartKeyIter};
use crate::query::{ChunkScanMethod, PartLookupResult, PartitionScanMethod, ScanSplit, TermInfo, TimeRange};
use crate::router::QueryRouter;
use crate::shard::{PartitionIter, ShardIndex, ShardRegistry, ShardStats, ShardSummary};
use crate::store::{ColumnStore, Labels, Sample, Schema, SchemaRegistry};

/// Read operations of a time-series store
pub trait ReadableTimeSeriesStore: Send + Sync {
    /// Up to `limit` label names of a shard
    fn index_names(&self, dataset: &DatasetRef, shard: ShardNumber, limit: usize) -> Result<Vec<(String, ShardNumber)>>;

    /// Most frequent values of a label in a shard
    fn label_values(&self, dataset: &DatasetRef, shard: ShardNumber, label: &str, top_k: usize) -> Result<Vec<TermInfo>>;

    /// Distinct label projections of the series matching every filter
    fn label_values_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        label_names: Vec<String>,
        range: TimeRange,
        limit: usize,
    ) -> Result<LabelValuesIter>;

    /// Keys of the series matching every filter
    fn part_keys_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        range: TimeRange,
        limit: usize,
    ) -> Result<PartKeyIter>;

    /// Resolve a scan method on the shard it is addressed to
    fn lookup_partitions(
        &self,
        dataset: &DatasetRef,
        method: &PartitionScanMethod,
        chunk_method: ChunkScanMethod,
    ) -> Result<PartLookupResult>;

    /// Stream the partitions of a lookup from `shard`
    fn scan_partitions(&self, dataset: &DatasetRef, shard: ShardNumber, lookup: &PartLookupResult) -> Result<PartitionIter>;

    /// Statistics of one shard
    fn shard_metrics(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<ShardStats>;

    /// Shards of a dataset registered on this node
    fn active_shards(&self, dataset: &DatasetRef) -> Vec<ShardNumber>;

    /// One split per active shard
    fn get_scan_splits(&self, dataset: &DatasetRef) -> Vec<ScanSplit>;
}

/// A batch of samples received from an ingestion stream
#[derive(Debug, Clone, PartialEq)]
pub struct IngestBatch {
    /// Stream offset of the batch
    pub offset: i64,
    /// Samples with the labels of their series
    pub records: Vec<(Labels, Sample)>,
}

/// Full time-series store contract, reads and writes
#[async_trait]
pub trait TimeSeriesStore: ReadableTimeSeriesStore {
    fn ingest(&self, dataset: &DatasetRef, shard: ShardNumber, batch: IngestBatch) -> Result<()>;

    async fn ingest_stream(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        stream: mpsc::Receiver<IngestBatch>,
    ) -> Result<()>;

    /// Replay a stream between two offsets, returning the last offset applied
    async fn recover_stream(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        start_offset: i64,
        end_offset: i64,
    ) -> Result<i64>;

    async fn truncate(&self, dataset: &DatasetRef) -> Result<()>;

    fn num_rows_ingested(&self, dataset: &DatasetRef) -> Result<u64>;

    fn latest_offset(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<i64>;

    fn groups_in_dataset(&self, dataset: &DatasetRef) -> Result<usize>;

    fn analyze_and_log_corrupt_ptr(&self, dataset: &DatasetRef, ptr: u64) -> Result<String>;
}

/// Read-only store serving the downsampled datasets of this node
pub struct DownsampledTimeSeriesStore {
    registry: Arc<ShardRegistry>,
    router: QueryRouter,
    schemas: Arc<dyn SchemaRegistry>,
    store_config: StoreConfig,
    downsample_config: DownsampleConfig,
    shutdown: CancellationToken,
}

impl DownsampledTimeSeriesStore {
    /// Create a store over a backing column store and schema registry
    pub fn new(
        store: Arc<dyn ColumnStore>,
        schemas: Arc<dyn SchemaRegistry>,
        store_config: StoreConfig,
        downsample_config: DownsampleConfig,
    ) -> Result<Self> {
        store_config.validate()?;
        downsample_config.validate()?;

        let shutdown = CancellationToken::new();
        let registry = Arc::new(ShardRegistry::new(store, shutdown.clone()));
        Ok(Self {
            router: QueryRouter::new(registry.clone()),
            registry,
            schemas,
            store_config,
            downsample_config,
            shutdown,
        })
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store_config
    }

    pub fn downsample_config(&self) -> &DownsampleConfig {
        &self.downsample_config
    }

    fn resolve_schema(&self, dataset: &DatasetRef) -> Result<Schema> {
        self.schemas
            .schema(dataset)
            .ok_or_else(|| Error::schema(format!("No schema registered for dataset {}", dataset)))
    }

    /// Set up a shard of a dataset, resolving its schema
    pub fn setup_shard(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<Arc<ShardIndex>> {
        let schema = self.resolve_schema(dataset)?;
        let index = self.registry.setup(
            dataset,
            shard,
            schema,
            self.store_config.clone(),
            self.downsample_config.clone(),
        )?;
        Ok(index)
    }

    /// Set up a shard in every downsampled dataset of the raw dataset
    ///
    /// Either every dataset gets the shard or none does: schemas are resolved
    /// before anything is registered, and a failed registration removes the
    /// shards registered before it.
    pub fn setup_downsampled_shard(&self, shard: ShardNumber) -> Result<Vec<Arc<ShardIndex>>> {
        if !self.downsample_config.enabled {
            return Err(Error::config("Downsampling is not enabled"));
        }

        let planned = self
            .downsample_config
            .downsampled_datasets()
            .into_values()
            .map(|dataset| self.resolve_schema(&dataset).map(|schema| (dataset, schema)))
            .collect::<Result<Vec<_>>>()?;

        let mut registered: Vec<(DatasetRef, Arc<ShardIndex>)> = Vec::with_capacity(planned.len());
        for (dataset, schema) in planned {
            let setup = self.registry.setup(
                &dataset,
                shard,
                schema,
                self.store_config.clone(),
                self.downsample_config.clone(),
            );
            match setup {
                Ok(index) => registered.push((dataset, index)),
                Err(err) => {
                    warn!(dataset = %dataset, shard, error = %err, "Rolling back downsampled shard setup");
                    for (dataset, index) in &registered {
                        self.registry.remove_shard(dataset, shard, index);
                    }
                    return Err(err.into());
                }
            }
        }

        Ok(registered.into_iter().map(|(_, index)| index).collect())
    }

    /// Remove a shard if `expected` is still the registered instance
    pub fn remove_shard(&self, dataset: &DatasetRef, shard: ShardNumber, expected: &Arc<ShardIndex>) -> bool {
        self.registry.remove_shard(dataset, shard, expected)
    }

    /// Rebuild the index of a registered shard
    pub async fn recover_index(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<u64> {
        let index = self.registry.get_shard_or_fail(dataset, shard)?;
        Ok(index.recover_index().await?)
    }

    /// Downsampled dataset best suited to a query starting at `query_start`
    pub fn dataset_for_query(&self, query_start: DateTime<Utc>, now: DateTime<Utc>) -> Option<DatasetRef> {
        if !self.downsample_config.enabled {
            return None;
        }
        let resolution = self.downsample_config.choose_resolution(query_start, now)?;
        Some(downsample_dataset_ref(&self.downsample_config.raw_dataset_ref(), resolution))
    }

    /// Statistics of every registered shard
    pub fn summary(&self) -> ShardSummary {
        self.registry.summary()
    }

    /// Cancel in-flight index recoveries
    pub fn shutdown(&self) {
        info!("Shutting down downsampled store");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drop every shard and reset the backing store
    pub async fn reset(&self) -> Result<()> {
        self.registry.reset().await?;
        Ok(())
    }

    fn reject(&self, operation: &'static str, dataset: &DatasetRef) -> Error {
        warn!(operation, dataset = %dataset, "Rejected write on read-only store");
        Error::unsupported(operation)
    }
}

impl ReadableTimeSeriesStore for DownsampledTimeSeriesStore {
    fn index_names(&self, dataset: &DatasetRef, shard: ShardNumber, limit: usize) -> Result<Vec<(String, ShardNumber)>> {
        Ok(self.router.index_names(dataset, shard, limit)?)
    }

    fn label_values(&self, dataset: &DatasetRef, shard: ShardNumber, label: &str, top_k: usize) -> Result<Vec<TermInfo>> {
        Ok(self.router.label_values(dataset, shard, label, top_k)?)
    }

    fn label_values_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        label_names: Vec<String>,
        range: TimeRange,
        limit: usize,
    ) -> Result<LabelValuesIter> {
        Ok(self
            .router
            .label_values_with_filters(dataset, shard, filters, label_names, range, limit)?)
    }

    fn part_keys_with_filters(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        filters: Vec<LabelFilter>,
        range: TimeRange,
        limit: usize,
    ) -> Result<PartKeyIter> {
        Ok(self.router.part_keys_with_filters(dataset, shard, filters, range, limit)?)
    }

    fn lookup_partitions(
        &self,
        dataset: &DatasetRef,
        method: &PartitionScanMethod,
        chunk_method: ChunkScanMethod,
    ) -> Result<PartLookupResult> {
        Ok(self.router.lookup_partitions(dataset, method, chunk_method)?)
    }

    fn scan_partitions(&self, dataset: &DatasetRef, shard: ShardNumber, lookup: &PartLookupResult) -> Result<PartitionIter> {
        Ok(self.router.scan_partitions(dataset, shard, lookup)?)
    }

    fn shard_metrics(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<ShardStats> {
        Ok(self.router.shard_metrics(dataset, shard)?)
    }

    fn active_shards(&self, dataset: &DatasetRef) -> Vec<ShardNumber> {
        self.registry.active_shards(dataset)
    }

    fn get_scan_splits(&self, dataset: &DatasetRef) -> Vec<ScanSplit> {
        self.router.get_scan_splits(dataset)
    }
}

#[async_trait]
impl TimeSeriesStore for DownsampledTimeSeriesStore {
    fn ingest(&self, dataset: &DatasetRef, _shard: ShardNumber, _batch: IngestBatch) -> Result<()> {
        Err(self.reject("ingest", dataset))
    }

    async fn ingest_stream(
        &self,
        dataset: &DatasetRef,
        _shard: ShardNumber,
        _stream: mpsc::Receiver<IngestBatch>,
    ) -> Result<()> {
        Err(self.reject("ingestStream", dataset))
    }

    async fn recover_stream(
        &self,
        dataset: &DatasetRef,
        _shard: ShardNumber,
        _start_offset: i64,
        _end_offset: i64,
    ) -> Result<i64> {
        Err(self.reject("recoverStream", dataset))
    }

    async fn truncate(&self, dataset: &DatasetRef) -> Result<()> {
        Err(self.reject("truncate", dataset))
    }

    fn num_rows_ingested(&self, dataset: &DatasetRef) -> Result<u64> {
        Err(self.reject("numRowsIngested", dataset))
    }

    fn latest_offset(&self, dataset: &DatasetRef, _shard: ShardNumber) -> Result<i64> {
        Err(self.reject("latestOffset", dataset))
    }

    fn groups_in_dataset(&self, dataset: &DatasetRef) -> Result<usize> {
        Err(self.reject("groupsInDataset", dataset))
    }

    fn analyze_and_log_corrupt_ptr(&self, dataset: &DatasetRef, _ptr: u64) -> Result<String> {
        Err(self.reject("analyzeAndLogCorruptPtr", dataset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Resolution;
    use crate::store::{MemoryColumnStore, Schema, StaticSchemaRegistry};
    use chrono::Duration;

    fn downsample_config() -> DownsampleConfig {
        DownsampleConfig::new("prometheus")
            .with_enabled(true)
            .with_resolution(Resolution::minutes(5).unwrap(), 7)
            .with_resolution(Resolution::minutes(60).unwrap(), 90)
    }

    fn facade() -> DownsampledTimeSeriesStore {
        let config = downsample_config();
        let schemas = config
            .downsampled_datasets()
            .into_values()
            .fold(StaticSchemaRegistry::new(), |registry, ds| registry.with_schema(ds, Schema::gauge()));
        DownsampledTimeSeriesStore::new(
            Arc::new(MemoryColumnStore::new()),
            Arc::new(schemas),
            StoreConfig::default(),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = DownsampledTimeSeriesStore::new(
            Arc::new(MemoryColumnStore::new()),
            Arc::new(StaticSchemaRegistry::new()),
            StoreConfig::new().with_part_key_page_size(0),
            DownsampleConfig::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_setup_requires_schema() {
        let store = facade();
        let err = store.setup_shard(&DatasetRef::new("unknown"), 0).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let index = store.setup_shard(&DatasetRef::new("prometheus_ds_5"), 0).unwrap();
        assert_eq!(index.schema().name, "ds-gauge");
    }

    #[test]
    fn test_setup_downsampled_shard() {
        let store = facade();
        let indexes = store.setup_downsampled_shard(2).unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(store.active_shards(&DatasetRef::new("prometheus_ds_60")), vec![2]);
        assert!(store.setup_downsampled_shard(2).is_err());
    }

    #[test]
    fn test_setup_downsampled_shard_missing_schema() {
        let fine = DatasetRef::new("prometheus_ds_5");
        let coarse = DatasetRef::new("prometheus_ds_60");
        let store = DownsampledTimeSeriesStore::new(
            Arc::new(MemoryColumnStore::new()),
            Arc::new(StaticSchemaRegistry::new().with_schema(fine.clone(), Schema::gauge())),
            StoreConfig::default(),
            downsample_config(),
        )
        .unwrap();

        let err = store.setup_downsampled_shard(0).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(store.active_shards(&fine).is_empty());
        assert!(store.active_shards(&coarse).is_empty());

        // Nothing was left behind, so the shard can still be set up
        assert!(store.setup_shard(&fine, 0).is_ok());
    }

    #[test]
    fn test_setup_downsampled_shard_rolls_back() {
        let store = facade();
        let fine = DatasetRef::new("prometheus_ds_5");
        let coarse = DatasetRef::new("prometheus_ds_60");
        let existing = store.setup_shard(&coarse, 1).unwrap();

        let err = store.setup_downsampled_shard(1).unwrap_err();
        assert!(err.as_shard_error().unwrap().is_already_setup());
        assert!(store.active_shards(&fine).is_empty());
        assert_eq!(store.active_shards(&coarse), vec![1]);

        assert!(store.remove_shard(&coarse, 1, &existing));
        assert_eq!(store.setup_downsampled_shard(1).unwrap().len(), 2);
        assert_eq!(store.active_shards(&fine), vec![1]);
    }

    #[test]
    fn test_dataset_for_query() {
        let store = facade();
        let now = Utc::now();
        assert_eq!(
            store.dataset_for_query(now - Duration::hours(1), now),
            Some(DatasetRef::new("prometheus_ds_5"))
        );
        assert_eq!(
            store.dataset_for_query(now - Duration::days(60), now),
            Some(DatasetRef::new("prometheus_ds_60"))
        );
    }

    #[tokio::test]
    async fn test_writes_are_unsupported() {
        let store = facade();
        let ds = DatasetRef::new("prometheus_ds_5");
        let batch = IngestBatch {
            offset: 0,
            records: Vec::new(),
        };

        assert!(store.ingest(&ds, 0, batch).unwrap_err().is_unsupported());
        assert!(store.truncate(&ds).await.unwrap_err().is_unsupported());
        assert!(store.num_rows_ingested(&ds).unwrap_err().is_unsupported());
        assert!(store.latest_offset(&ds, 0).unwrap_err().is_unsupported());
        assert!(store.groups_in_dataset(&ds).unwrap_err().is_unsupported());
        assert!(store.analyze_and_log_corrupt_ptr(&ds, 0).unwrap_err().is_unsupported());
        assert!(store.recover_stream(&ds, 0, 0, 10).await.unwrap_err().is_unsupported());

        let (_tx, rx) = mpsc::channel(1);
        assert!(store.ingest_stream(&ds, 0, rx).await.unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_recovery() {
        let store = facade();
        let ds = DatasetRef::new("prometheus_ds_5");
        store.setup_shard(&ds, 0).unwrap();

        store.shutdown();
        assert!(store.is_shutdown());
        let err = store.recover_index(&ds, 0).await.unwrap_err();
        assert!(err.as_shard_error().unwrap().is_cancelled());
    }
}
