//! Contracts of the external services this crate reads from
//!
//! The backing column store and the schema registry are owned elsewhere and
//! treated as read-only here. [`MemoryColumnStore`] is an in-process
//! implementation used by tests and embedded setups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::{DatasetRef, ShardNumber};
use crate::index::PartKey;
use crate::query::TimeRange;

mod memory;

pub use memory::MemoryColumnStore;

/// Label set of a single series
pub type Labels = BTreeMap<String, String>;

/// Errors raised by the backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store cannot be reached right now
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    /// Requested data does not exist
    #[error("Not found in backing store: {0}")]
    NotFound(String),

    /// Reader was used after being closed
    #[error("Reader is closed")]
    ReaderClosed,

    /// Generic error
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Check if the store was unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for backing store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persisted description of one series, as read back during index recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartKeyRecord {
    /// Series labels
    pub labels: Labels,
    /// First sample time
    pub start_time: DateTime<Utc>,
    /// Last sample time
    pub end_time: DateTime<Utc>,
}

impl PartKeyRecord {
    pub fn new(labels: Labels, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            labels,
            start_time,
            end_time,
        }
    }
}

/// A single downsampled sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A contiguous, time-ordered block of samples of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSet {
    /// Chunk identifier, unique within the series
    pub id: u64,
    /// First sample time
    pub start_time: DateTime<Utc>,
    /// Last sample time
    pub end_time: DateTime<Utc>,
    /// Samples ordered by time
    pub samples: Vec<Sample>,
}

impl ChunkSet {
    /// Build a chunk from time-ordered samples
    pub fn from_samples(id: u64, samples: Vec<Sample>) -> Option<Self> {
        let start_time = samples.first()?.timestamp;
        let end_time = samples.last()?.timestamp;
        Some(Self {
            id,
            start_time,
            end_time,
            samples,
        })
    }

    /// Number of samples in the chunk
    pub fn num_rows(&self) -> usize {
        self.samples.len()
    }
}

/// Column definition in a dataset schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: String,
}

/// Schema of a dataset as stored in the metadata store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name
    pub name: String,
    /// Data columns
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    /// Schema for gauge-style downsampled data
    pub fn gauge() -> Self {
        let col = |name: &str, column_type: &str| ColumnDef {
            name: name.to_string(),
            column_type: column_type.to_string(),
        };
        Self {
            name: "ds-gauge".to_string(),
            columns: vec![
                col("timestamp", "ts"),
                col("min", "double"),
                col("max", "double"),
                col("sum", "double"),
                col("count", "double"),
                col("avg", "double"),
            ],
        }
    }
}

/// Page-wise cursor over the persisted part keys of one shard
///
/// Dropping the cursor releases the underlying handle.
#[async_trait]
pub trait PartKeyCursor: Send {
    /// Next page, or `None` once exhausted
    async fn next_page(&mut self) -> StoreResult<Option<Vec<PartKeyRecord>>>;
}

impl std::fmt::Debug for dyn PartKeyCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PartKeyCursor")
    }
}

/// Handle for reading chunk data of one shard
pub trait PartitionReader: Send {
    /// Read chunks of a partition intersecting `range`, ordered by time
    fn read_chunks(&mut self, part_key: &PartKey, range: &TimeRange) -> StoreResult<Vec<ChunkSet>>;

    /// Release the handle; further reads fail
    fn close(&mut self);
}

/// Read side of the persistent column store
#[async_trait]
pub trait ColumnStore: Send + Sync + 'static {
    /// Open a cursor over the part keys persisted for a shard
    async fn scan_part_keys(
        &self,
        dataset: &DatasetRef,
        shard: ShardNumber,
        page_size: usize,
    ) -> StoreResult<Box<dyn PartKeyCursor>>;

    /// Open a chunk reader for a shard
    fn open_reader(&self, dataset: &DatasetRef, shard: ShardNumber) -> StoreResult<Box<dyn PartitionReader>>;

    /// Drop all state held by the store; administrative use only
    async fn reset(&self) -> StoreResult<()>;
}

/// Metadata store resolving datasets to schemas
pub trait SchemaRegistry: Send + Sync + 'static {
    fn schema(&self, dataset: &DatasetRef) -> Option<Schema>;
}

/// Schema registry backed by a fixed map
#[derive(Debug, Default, Clone)]
pub struct StaticSchemaRegistry {
    schemas: BTreeMap<DatasetRef, Schema>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema for a dataset
    pub fn with_schema(mut self, dataset: DatasetRef, schema: Schema) -> Self {
        self.schemas.insert(dataset, schema);
        self
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    fn schema(&self, dataset: &DatasetRef) -> Option<Schema> {
        self.schemas.get(dataset).cloned()
    }
}

impl<T: SchemaRegistry> SchemaRegistry for Arc<T> {
    fn schema(&self, dataset: &DatasetRef) -> Option<Schema> {
        (**self).schema(dataset)
    }
}
