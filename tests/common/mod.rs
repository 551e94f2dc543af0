#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use downsample_store::{
    ChunkSet, ColumnStore, DatasetRef, Labels, MemoryColumnStore, PartKeyCursor, PartKeyRecord, PartitionReader,
    Sample, ShardNumber, StoreError,
};

pub fn t(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn chunk(id: u64, minutes: &[u32]) -> ChunkSet {
    let samples = minutes
        .iter()
        .map(|m| Sample {
            timestamp: t(*m),
            value: *m as f64,
        })
        .collect();
    ChunkSet::from_samples(id, samples).unwrap()
}

/// Add `count` series with `host` set to the given value
pub fn add_hosts(store: &MemoryColumnStore, dataset: &DatasetRef, shard: ShardNumber, host: &str, count: usize) {
    for i in 0..count {
        let id = format!("{}-{}", host, i);
        store.add_series(
            dataset,
            shard,
            labels(&[("host", host), ("id", &id), ("job", "api")]),
            vec![chunk(1, &[0, 5]), chunk(2, &[10, 15])],
        );
    }
}

/// Column store whose cursors hang after their first page while stalled
pub struct StallingStore {
    pub inner: MemoryColumnStore,
    stall: Arc<AtomicBool>,
}

impl StallingStore {
    pub fn new(inner: MemoryColumnStore) -> Self {
        Self {
            inner,
            stall: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stall.store(stalled, Ordering::SeqCst);
    }
}

struct StallingCursor {
    inner: Box<dyn PartKeyCursor>,
    stall: bool,
    served: bool,
}

#[async_trait]
impl PartKeyCursor for StallingCursor {
    async fn next_page(&mut self) -> Result<Option<Vec<PartKeyRecord>>, StoreError> {
        if self.stall && self.served {
            std::future::pending::<()>().await;
        }
        self.served = true;
        self.inner.next_page().await
    }
}

#[async_trait]
impl ColumnStore for StallingStore {
    async fn scan_part_keys(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        page_size: usize,
    ) -> Result<Box<dyn PartKeyCursor>, StoreError> {
        let inner = self.inner.scan_part_keys(dataset, shard, page_size).await?;
        Ok(Box::new(StallingCursor {
            inner,
            stall: self.stall.load(Ordering::SeqCst),
            served: false,
        }))
    }

    fn open_reader(&self, dataset: &DatasetRef, shard: ShardNumber) -> Result<Box<dyn PartitionReader>, StoreError> {
        self.inner.open_reader(dataset, shard)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.inner.reset().await
    }
}
