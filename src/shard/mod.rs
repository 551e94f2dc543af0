//! Shard management for downsampled datasets
//!
//! Each node serves a subset of the shards of every dataset. The
//! [`ShardRegistry`] tracks which shards are set up here, and each shard's
//! [`ShardIndex`] answers label and partition queries from an index snapshot
//! recovered from the backing store.

mod error;
mod index;
mod info;
mod registry;

pub use error::{ShardError, ShardResult};
pub use index::{PartitionIter, ReadablePartition, ShardIndex};
pub use info::{IndexState, ShardStats, ShardSummary};
pub use registry::ShardRegistry;
