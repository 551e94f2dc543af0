//! Query descriptors: time ranges, scan methods and lookup results

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dataset::ShardNumber;
use crate::filter::LabelFilter;
use crate::index::{PartKey, PartRecord};

/// Time range for querying series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start time (inclusive)
    pub start: DateTime<Utc>,
    /// End time (exclusive)
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering all representable time
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Check if a timestamp falls in this range
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp < self.end
    }

    /// Check if the closed interval `[start, end]` intersects this range
    pub fn overlaps(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> bool {
        *start < self.end && *end >= self.start
    }
}

/// One parallelizable unit of a full dataset scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanSplit {
    /// Shard covered by this split
    pub shard: ShardNumber,
}

/// Which partitions a lookup should resolve
#[derive(Debug, Clone)]
pub enum PartitionScanMethod {
    /// Every partition matching all filters
    FilteredPartitionScan {
        split: ScanSplit,
        filters: Vec<LabelFilter>,
    },
    /// An explicit set of partition keys
    MultiPartitionScan {
        shard: ShardNumber,
        part_keys: Vec<PartKey>,
    },
    /// A single partition key
    SinglePartitionScan {
        shard: ShardNumber,
        part_key: PartKey,
    },
}

impl PartitionScanMethod {
    /// Shard the method is addressed to
    pub fn shard(&self) -> ShardNumber {
        match self {
            Self::FilteredPartitionScan { split, .. } => split.shard,
            Self::MultiPartitionScan { shard, .. } => *shard,
            Self::SinglePartitionScan { shard, .. } => *shard,
        }
    }

    /// Scan all partitions of a shard
    pub fn all(shard: ShardNumber) -> Self {
        Self::FilteredPartitionScan {
            split: ScanSplit { shard },
            filters: Vec::new(),
        }
    }
}

/// Which chunks of each partition a scan should read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkScanMethod {
    /// Every chunk
    AllChunks,
    /// Chunks intersecting the range
    TimeRange(TimeRange),
}

impl ChunkScanMethod {
    /// Time range equivalent of this method
    pub fn time_range(&self) -> TimeRange {
        match self {
            Self::AllChunks => TimeRange::all(),
            Self::TimeRange(range) => *range,
        }
    }
}

/// Resolved set of partitions, bound to the shard that produced it
#[derive(Debug, Clone)]
pub struct PartLookupResult {
    /// Shard the result was produced for
    pub shard: ShardNumber,
    /// Chunk selection to apply when scanning
    pub chunk_method: ChunkScanMethod,
    /// Matched partitions
    pub parts: Vec<Arc<PartRecord>>,
    /// Index generation the result was resolved against
    pub index_generation: u64,
}

impl PartLookupResult {
    /// Number of matched partitions
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Check if nothing matched
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Matched partition keys
    pub fn part_keys(&self) -> impl Iterator<Item = &PartKey> {
        self.parts.iter().map(|p| &p.part_key)
    }
}

/// A label value and how many series carry it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermInfo {
    pub value: String,
    pub freq: usize,
}

impl TermInfo {
    pub fn new(value: impl Into<String>, freq: usize) -> Self {
        Self {
            value: value.into(),
            freq,
        }
    }
}
