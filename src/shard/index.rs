//! Per-shard index over a downsampled dataset
//!
//! A [`ShardIndex`] owns the published [`IndexSnapshot`] of one shard and
//! rebuilds it from the backing store on [`ShardIndex::recover_index`].
//! Readers load the current snapshot without locking and keep using it for
//! the rest of their call, so a rebuild never tears a read.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use std::vec;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{IndexState, ShardError, ShardResult, ShardStats};
use crate::config::{DownsampleConfig, StoreConfig};
use crate::dataset::{DatasetRef, ShardNumber};
use crate::filter::LabelFilter;
use crate::index::{IndexSnapshot, IndexSnapshotBuilder, LabelValuesIter, PartKey, PartKeyIter, PartRecord};
use crate::metrics::ShardMetrics;
use crate::query::{ChunkScanMethod, PartLookupResult, PartitionScanMethod, TermInfo, TimeRange};
use crate::store::{ChunkSet, ColumnStore, Labels, PartitionReader, Schema};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Index and scan entry point of one shard of a dataset
pub struct ShardIndex {
    dataset: DatasetRef,
    shard: ShardNumber,
    instance_id: u64,
    schema: Schema,
    store_config: StoreConfig,
    downsample_config: DownsampleConfig,
    store: Arc<dyn ColumnStore>,
    snapshot: ArcSwapOption<IndexSnapshot>,
    state: AtomicU8,
    next_generation: AtomicU64,
    recovery: AsyncMutex<()>,
    shutdown: CancellationToken,
    metrics: Arc<ShardMetrics>,
}

impl std::fmt::Debug for ShardIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardIndex")
            .field("dataset", &self.dataset)
            .field("shard", &self.shard)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ShardIndex {
    /// Create an uninitialized shard index
    ///
    /// `shutdown` is observed by [`ShardIndex::recover_index`]; cancelling it
    /// aborts an in-flight rebuild.
    pub fn new(
        dataset: DatasetRef,
        shard: ShardNumber,
        schema: Schema,
        store_config: StoreConfig,
        downsample_config: DownsampleConfig,
        store: Arc<dyn ColumnStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dataset,
            shard,
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            schema,
            store_config,
            downsample_config,
            store,
            snapshot: ArcSwapOption::empty(),
            state: AtomicU8::new(IndexState::Uninitialized.as_u8()),
            next_generation: AtomicU64::new(1),
            recovery: AsyncMutex::new(()),
            shutdown,
            metrics: Arc::new(ShardMetrics::new()),
        }
    }

    pub fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    pub fn shard(&self) -> ShardNumber {
        self.shard
    }

    /// Process-unique id of this instance; a shard set up again gets a new one
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.store_config
    }

    pub fn downsample_config(&self) -> &DownsampleConfig {
        &self.downsample_config
    }

    pub fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    /// Current index state
    pub fn state(&self) -> IndexState {
        IndexState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: IndexState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Currently published snapshot, if any
    pub fn current_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot.load_full()
    }

    fn ready_snapshot(&self) -> ShardResult<Arc<IndexSnapshot>> {
        self.snapshot.load_full().ok_or_else(|| {
            self.metrics.increment_errors();
            ShardError::index_not_ready(self.dataset.clone(), self.shard)
        })
    }

    fn check_shard(&self, shard: ShardNumber) -> ShardResult<()> {
        if shard != self.shard {
            self.metrics.increment_errors();
            return Err(ShardError::shard_mismatch(self.shard, shard));
        }
        Ok(())
    }

    fn cancelled(&self) -> ShardError {
        ShardError::cancelled(self.dataset.clone(), self.shard)
    }

    /// Rebuild the index from the backing store and publish it
    ///
    /// Rebuilds of the same shard run one at a time. Reads keep being served
    /// from the previous snapshot until the new one is swapped in; on failure
    /// or cancellation the previous snapshot stays published.
    /// Returns the generation of the published snapshot.
    pub async fn recover_index(&self) -> ShardResult<u64> {
        let _serial = self.recovery.lock().await;

        let guard = StateGuard::enter(self);
        let start = Instant::now();
        info!(dataset = %self.dataset, shard = self.shard, "Recovering shard index");

        match self.build_snapshot().await {
            Ok(snapshot) => {
                let generation = snapshot.generation();
                let num_partitions = snapshot.num_partitions();
                self.snapshot.store(Some(Arc::new(snapshot)));
                guard.commit();

                let elapsed = start.elapsed();
                self.metrics.record_recovery(elapsed);
                info!(
                    dataset = %self.dataset,
                    shard = self.shard,
                    generation,
                    num_partitions,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Shard index recovered"
                );
                Ok(generation)
            }
            Err(err) => {
                drop(guard);
                self.metrics.record_recovery_failure();
                if err.is_cancelled() {
                    warn!(dataset = %self.dataset, shard = self.shard, "Shard index recovery cancelled");
                } else {
                    warn!(dataset = %self.dataset, shard = self.shard, error = %err, "Shard index recovery failed");
                }
                Err(err)
            }
        }
    }

    async fn build_snapshot(&self) -> ShardResult<IndexSnapshot> {
        let page_size = self.store_config.part_key_page_size;

        let mut cursor = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(self.cancelled()),
            cursor = self.store.scan_part_keys(&self.dataset, self.shard, page_size) => cursor?,
        };

        let mut builder = IndexSnapshotBuilder::new();
        let mut pages = 0usize;
        loop {
            let page = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(self.cancelled()),
                page = cursor.next_page() => page?,
            };
            let Some(records) = page else {
                break;
            };
            pages += 1;
            for record in records {
                builder.add(record);
            }
        }
        debug!(dataset = %self.dataset, shard = self.shard, pages, partitions = builder.len(), "Read part keys");

        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        Ok(builder.build(generation))
    }

    /// Up to `limit` label names known to this shard
    pub fn index_names(&self, limit: usize) -> ShardResult<Vec<(String, ShardNumber)>> {
        let snapshot = self.ready_snapshot()?;
        self.metrics.increment_label_queries();
        Ok(snapshot
            .label_names(limit)
            .map(|name| (name.to_string(), self.shard))
            .collect())
    }

    /// The `top_k` most frequent values of `label`
    pub fn label_values(&self, label: &str, top_k: usize) -> ShardResult<Vec<TermInfo>> {
        let snapshot = self.ready_snapshot()?;
        self.metrics.increment_label_queries();
        Ok(snapshot.label_values(label, top_k))
    }

    /// Distinct projections onto `label_names` of the series matching every filter
    pub fn label_values_with_filters(
        &self,
        filters: Vec<LabelFilter>,
        label_names: Vec<String>,
        range: TimeRange,
        limit: usize,
    ) -> ShardResult<LabelValuesIter> {
        let snapshot = self.ready_snapshot()?;
        self.metrics.increment_filter_queries();
        Ok(LabelValuesIter::new(snapshot.matching_parts(filters, range), label_names, limit))
    }

    /// Keys of the series matching every filter
    pub fn part_keys_with_filters(
        &self,
        filters: Vec<LabelFilter>,
        range: TimeRange,
        limit: usize,
    ) -> ShardResult<PartKeyIter> {
        let snapshot = self.ready_snapshot()?;
        self.metrics.increment_filter_queries();
        Ok(PartKeyIter::new(snapshot.matching_parts(filters, range), limit))
    }

    /// Resolve a scan method into the concrete partitions of this shard
    pub fn lookup_partitions(
        &self,
        method: &PartitionScanMethod,
        chunk_method: ChunkScanMethod,
    ) -> ShardResult<PartLookupResult> {
        self.check_shard(method.shard())?;
        let snapshot = self.ready_snapshot()?;
        self.metrics.increment_lookups();

        let range = chunk_method.time_range();
        let parts: Vec<Arc<PartRecord>> = match method {
            PartitionScanMethod::FilteredPartitionScan { filters, .. } => snapshot.filter_parts(
                filters,
                &range,
                self.store_config.partition_list_parallelism,
                self.store_config.parallel_lookup_threshold,
            ),
            PartitionScanMethod::MultiPartitionScan { part_keys, .. } => {
                part_keys.iter().filter_map(|key| snapshot.get(key).cloned()).collect()
            }
            PartitionScanMethod::SinglePartitionScan { part_key, .. } => {
                snapshot.get(part_key).cloned().into_iter().collect()
            }
        };

        debug!(
            dataset = %self.dataset,
            shard = self.shard,
            generation = snapshot.generation(),
            partitions = parts.len(),
            "Looked up partitions"
        );

        Ok(PartLookupResult {
            shard: self.shard,
            chunk_method,
            parts,
            index_generation: snapshot.generation(),
        })
    }

    /// Stream the chunk data of a previous lookup
    ///
    /// The returned iterator holds a reader on the backing store, released
    /// when the iterator is exhausted, fails, or is dropped.
    pub fn scan_partitions(&self, lookup: &PartLookupResult) -> ShardResult<PartitionIter> {
        self.check_shard(lookup.shard)?;

        let reader = self.store.open_reader(&self.dataset, self.shard).map_err(|err| {
            self.metrics.increment_errors();
            ShardError::from(err)
        })?;
        self.metrics.increment_scans();

        Ok(PartitionIter {
            reader: Some(reader),
            parts: lookup.parts.clone().into_iter(),
            range: lookup.chunk_method.time_range(),
            metrics: self.metrics.clone(),
        })
    }

    /// Point-in-time statistics of this shard
    pub fn shard_stats(&self) -> ShardStats {
        let snapshot = self.snapshot.load();
        let snapshot = snapshot.as_deref();
        ShardStats {
            dataset: self.dataset.clone(),
            shard: self.shard,
            state: self.state(),
            generation: snapshot.map_or(0, IndexSnapshot::generation),
            num_partitions: snapshot.map_or(0, IndexSnapshot::num_partitions),
            num_label_names: snapshot.map_or(0, IndexSnapshot::num_label_names),
            indexed_at: snapshot.map(IndexSnapshot::built_at),
            lookups: self.metrics.get_lookup_count(),
            scans: self.metrics.get_scan_count(),
            partitions_scanned: self.metrics.get_partitions_scanned(),
            label_queries: self.metrics.get_label_query_count() + self.metrics.get_filter_query_count(),
            errors: self.metrics.get_error_count(),
            recoveries: self.metrics.get_recovery_count(),
            recovery_failures: self.metrics.get_recovery_failures(),
            last_recovery_duration: self.metrics.get_last_recovery_duration(),
        }
    }
}

/// Puts the shard into `Indexing` and restores a consistent state unless committed
///
/// Restoring on drop also covers a recovery future dropped mid-flight.
struct StateGuard<'a> {
    index: &'a ShardIndex,
    committed: bool,
}

impl<'a> StateGuard<'a> {
    fn enter(index: &'a ShardIndex) -> Self {
        index.set_state(IndexState::Indexing);
        Self {
            index,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
        self.index.set_state(IndexState::Ready);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let state = if self.index.snapshot.load().is_some() {
            IndexState::Ready
        } else {
            IndexState::Uninitialized
        };
        self.index.set_state(state);
    }
}

/// Chunk data of one partition
#[derive(Debug, Clone, PartialEq)]
pub struct ReadablePartition {
    pub part_key: PartKey,
    pub labels: Labels,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Chunks intersecting the scanned range, ordered by time
    pub chunks: Vec<ChunkSet>,
}

impl ReadablePartition {
    /// Number of samples across all chunks
    pub fn num_rows(&self) -> usize {
        self.chunks.iter().map(ChunkSet::num_rows).sum()
    }
}

/// Pull-based stream of partitions read from the backing store
///
/// Ends after the first error.
pub struct PartitionIter {
    reader: Option<Box<dyn PartitionReader>>,
    parts: vec::IntoIter<Arc<PartRecord>>,
    range: TimeRange,
    metrics: Arc<ShardMetrics>,
}

impl std::fmt::Debug for PartitionIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionIter")
            .field("remaining", &self.remaining())
            .field("range", &self.range)
            .finish()
    }
}

impl PartitionIter {
    /// Partitions not yet streamed
    pub fn remaining(&self) -> usize {
        if self.reader.is_some() {
            self.parts.len()
        } else {
            0
        }
    }

    fn release(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }
}

impl Iterator for PartitionIter {
    type Item = ShardResult<ReadablePartition>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        let Some(part) = self.parts.next() else {
            self.release();
            return None;
        };

        match reader.read_chunks(&part.part_key, &self.range) {
            Ok(chunks) => {
                self.metrics.add_partitions_scanned(1);
                Some(Ok(ReadablePartition {
                    part_key: part.part_key.clone(),
                    labels: part.labels.clone(),
                    start_time: part.start_time,
                    end_time: part.end_time,
                    chunks,
                }))
            }
            Err(err) => {
                self.release();
                self.metrics.increment_errors();
                Some(Err(err.into()))
            }
        }
    }
}

impl Drop for PartitionIter {
    fn drop(&mut self) {
        self.release();
    }
}
