//! In-process column store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    ChunkSet, ColumnStore, Labels, PartKeyCursor, PartKeyRecord, PartitionReader, StoreError,
    StoreResult,
};
use crate::dataset::{DatasetRef, ShardNumber};
use crate::index::PartKey;
use crate::query::TimeRange;

#[derive(Debug, Default)]
struct ShardData {
    records: Vec<PartKeyRecord>,
    chunks: HashMap<PartKey, Vec<ChunkSet>>,
}

#[derive(Debug, Default)]
struct Inner {
    shards: RwLock<HashMap<(DatasetRef, ShardNumber), ShardData>>,
    unavailable: AtomicBool,
    open_readers: AtomicUsize,
    open_cursors: AtomicUsize,
    resets: AtomicUsize,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("memory store switched off"));
        }
        Ok(())
    }
}

/// Column store keeping everything in memory
///
/// Tracks open reader and cursor handles so callers can verify that
/// abandoned scans release them.
#[derive(Debug, Clone, Default)]
pub struct MemoryColumnStore {
    inner: Arc<Inner>,
}

impl MemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series with its chunks; the persisted time span is taken from the chunks
    pub fn add_series(&self, dataset: &DatasetRef, shard: ShardNumber, labels: Labels, mut chunks: Vec<ChunkSet>) {
        chunks.sort_by_key(|c| c.start_time);
        let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
            return;
        };
        let record = PartKeyRecord::new(labels, first.start_time, last.end_time);
        let part_key = PartKey::from_labels(&record.labels);

        let mut shards = self.inner.shards.write();
        let data = shards.entry((dataset.clone(), shard)).or_default();
        data.records.push(record);
        data.chunks.entry(part_key).or_default().extend(chunks);
    }

    /// Add a part key record without chunk data
    pub fn add_part_key(&self, dataset: &DatasetRef, shard: ShardNumber, record: PartKeyRecord) {
        let mut shards = self.inner.shards.write();
        shards.entry((dataset.clone(), shard)).or_default().records.push(record);
    }

    /// Remove everything stored for a shard
    pub fn clear_shard(&self, dataset: &DatasetRef, shard: ShardNumber) {
        self.inner.shards.write().remove(&(dataset.clone(), shard));
    }

    /// Make every subsequent read fail with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::Release);
    }

    /// Number of chunk readers not yet released
    pub fn open_readers(&self) -> usize {
        self.inner.open_readers.load(Ordering::Acquire)
    }

    /// Number of part key cursors not yet released
    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors.load(Ordering::Acquire)
    }

    /// Number of times `reset` was called
    pub fn reset_count(&self) -> usize {
        self.inner.resets.load(Ordering::Acquire)
    }
}

struct MemoryCursor {
    inner: Arc<Inner>,
    records: Vec<PartKeyRecord>,
    position: usize,
    page_size: usize,
}

#[async_trait]
impl PartKeyCursor for MemoryCursor {
    async fn next_page(&mut self) -> StoreResult<Option<Vec<PartKeyRecord>>> {
        // let concurrent readers interleave with long recoveries
        tokio::task::yield_now().await;
        self.inner.check_available()?;

        if self.position >= self.records.len() {
            return Ok(None);
        }
        let end = (self.position + self.page_size).min(self.records.len());
        let page = self.records[self.position..end].to_vec();
        self.position = end;
        Ok(Some(page))
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.inner.open_cursors.fetch_sub(1, Ordering::AcqRel);
    }
}

struct MemoryReader {
    inner: Arc<Inner>,
    key: (DatasetRef, ShardNumber),
    closed: bool,
}

impl PartitionReader for MemoryReader {
    fn read_chunks(&mut self, part_key: &PartKey, range: &TimeRange) -> StoreResult<Vec<ChunkSet>> {
        if self.closed {
            return Err(StoreError::ReaderClosed);
        }
        self.inner.check_available()?;

        let shards = self.inner.shards.read();
        let chunks = shards
            .get(&self.key)
            .and_then(|data| data.chunks.get(part_key))
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|c| range.overlaps(&c.start_time, &c.end_time))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(chunks)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open_readers.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl ColumnStore for MemoryColumnStore {
    async fn scan_part_keys(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        page_size: usize,
    ) -> StoreResult<Box<dyn PartKeyCursor>> {
        self.inner.check_available()?;

        let records = self
            .inner
            .shards
            .read()
            .get(&(dataset.clone(), shard))
            .map(|data| data.records.clone())
            .unwrap_or_default();

        self.inner.open_cursors.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryCursor {
            inner: self.inner.clone(),
            records,
            position: 0,
            page_size: page_size.max(1),
        }))
    }

    fn open_reader(&self, dataset: &DatasetRef, shard: ShardNumber) -> StoreResult<Box<dyn PartitionReader>> {
        self.inner.check_available()?;
        self.inner.open_readers.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryReader {
            inner: self.inner.clone(),
            key: (dataset.clone(), shard),
            closed: false,
        }))
    }

    async fn reset(&self) -> StoreResult<()> {
        self.inner.shards.write().clear();
        self.inner.resets.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
