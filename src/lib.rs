//! # downsample_store
//!
//! Shard management and query routing for downsampled time-series datasets.
//!
//! A raw dataset is downsampled into one derived dataset per resolution. This
//! crate serves the read side of those derived datasets on one node:
//!
//! - [`ShardRegistry`] tracks the shards set up on the node
//! - [`ShardIndex`] indexes the series of one shard and streams their chunks
//! - [`QueryRouter`] sends shard-scoped queries to the owning index
//! - [`DownsampledTimeSeriesStore`] ties them together behind the store traits
//!
//! Data is read from a [`ColumnStore`]; nothing here writes to it.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use downsample_store::{
//!     DatasetRef, DownsampleConfig, DownsampledTimeSeriesStore, MemoryColumnStore,
//!     ReadableTimeSeriesStore, Resolution, Schema, StaticSchemaRegistry, StoreConfig,
//! };
//!
//! # async fn run() -> downsample_store::Result<()> {
//! let config = DownsampleConfig::new("prometheus")
//!     .with_enabled(true)
//!     .with_resolution(Resolution::minutes(5)?, 7);
//! let schemas = StaticSchemaRegistry::new()
//!     .with_schema(DatasetRef::new("prometheus_ds_5"), Schema::gauge());
//!
//! let store = DownsampledTimeSeriesStore::new(
//!     Arc::new(MemoryColumnStore::new()),
//!     Arc::new(schemas),
//!     StoreConfig::default(),
//!     config,
//! )?;
//!
//! let dataset = DatasetRef::new("prometheus_ds_5");
//! store.setup_shard(&dataset, 0)?;
//! store.recover_index(&dataset, 0).await?;
//!
//! for term in store.label_values(&dataset, 0, "host", 10)? {
//!     println!("{} ({})", term.value, term.freq);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod facade;
pub mod filter;
pub mod index;
pub mod metrics;
pub mod query;
pub mod router;
pub mod shard;
pub mod store;

pub use config::{DownsampleConfig, StoreConfig};
pub use dataset::{downsample_dataset_ref, downsample_dataset_refs, DatasetRef, Resolution, ShardNumber};
pub use error::{Error, Result};
pub use facade::{DownsampledTimeSeriesStore, IngestBatch, ReadableTimeSeriesStore, TimeSeriesStore};
pub use filter::{FilterMatch, LabelFilter};
pub use index::{IndexSnapshot, LabelValuesIter, PartKey, PartKeyIter, PartRecord};
pub use metrics::ShardMetrics;
pub use query::{ChunkScanMethod, PartLookupResult, PartitionScanMethod, ScanSplit, TermInfo, TimeRange};
pub use router::QueryRouter;
pub use shard::{
    IndexState, PartitionIter, ReadablePartition, ShardError, ShardIndex, ShardRegistry, ShardResult, ShardStats,
    ShardSummary,
};
pub use store::{
    ChunkSet, ColumnStore, Labels, MemoryColumnStore, PartKeyRecord, PartKeyCursor, PartitionReader, Sample, Schema,
    SchemaRegistry, StaticSchemaRegistry, StoreError,
};
