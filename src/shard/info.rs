//! Shard state and statistics data structures

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetRef, ShardNumber};

/// Lifecycle of a shard's index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexState {
    /// No index has been built yet
    Uninitialized,
    /// A recovery is building the next snapshot
    Indexing,
    /// A snapshot is published and serving reads
    Ready,
}

impl IndexState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Indexing => 1,
            Self::Ready => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Indexing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Indexing => write!(f, "indexing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Point-in-time statistics of one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStats {
    /// Dataset the shard belongs to
    pub dataset: DatasetRef,
    /// Shard number
    pub shard: ShardNumber,
    /// Index state
    pub state: IndexState,
    /// Generation of the published snapshot, 0 if none
    pub generation: u64,
    /// Number of indexed partitions
    pub num_partitions: usize,
    /// Number of distinct label names
    pub num_label_names: usize,
    /// When the published snapshot was built
    pub indexed_at: Option<DateTime<Utc>>,
    /// Partition lookups served
    pub lookups: usize,
    /// Partition scans started
    pub scans: usize,
    /// Partitions streamed by scans
    pub partitions_scanned: usize,
    /// Label name and value queries served
    pub label_queries: usize,
    /// Failed operations
    pub errors: usize,
    /// Completed index recoveries
    pub recoveries: usize,
    /// Failed or cancelled index recoveries
    pub recovery_failures: usize,
    /// Duration of the last successful recovery
    pub last_recovery_duration: Duration,
}

impl ShardStats {
    /// Check if the shard serves reads
    pub fn is_ready(&self) -> bool {
        self.state == IndexState::Ready
    }

    /// Create a human-readable report of statistics
    pub fn report(&self) -> String {
        let mut result = String::new();

        result.push_str(&format!("=== Shard {} of {} ===\n\n", self.shard, self.dataset));
        result.push_str(&format!("State: {}\n", self.state));
        result.push_str(&format!("Generation: {}\n", self.generation));
        result.push_str(&format!("Partitions: {}\n", self.num_partitions));
        result.push_str(&format!("Label Names: {}\n", self.num_label_names));

        if let Some(at) = self.indexed_at {
            result.push_str(&format!("Indexed At: {}\n", at));
        }

        result.push_str(&format!("Lookups: {}\n", self.lookups));
        result.push_str(&format!("Scans: {}\n", self.scans));
        result.push_str(&format!("  - Partitions Scanned: {}\n", self.partitions_scanned));
        result.push_str(&format!("Label Queries: {}\n", self.label_queries));
        result.push_str(&format!("Errors: {}\n", self.errors));
        result.push_str(&format!("Recoveries: {}\n", self.recoveries));
        result.push_str(&format!("  - Failed: {}\n", self.recovery_failures));
        result.push_str(&format!(
            "  - Last Duration: {:.2}ms\n",
            self.last_recovery_duration.as_secs_f64() * 1000.0
        ));

        result
    }
}

/// Statistics aggregated over many shards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardSummary {
    /// Number of shards
    pub shard_count: usize,
    /// Number of shards serving reads
    pub ready_shards: usize,
    /// Number of shards currently recovering
    pub indexing_shards: usize,
    /// Number of shards without an index
    pub uninitialized_shards: usize,
    /// Total indexed partitions
    pub total_partitions: usize,
    /// Total lookups served
    pub lookups: usize,
    /// Total partitions streamed by scans
    pub partitions_scanned: usize,
    /// Total failed operations
    pub errors: usize,
    /// Oldest snapshot build time
    pub oldest_index: Option<DateTime<Utc>>,
    /// Newest snapshot build time
    pub newest_index: Option<DateTime<Utc>>,
}

impl ShardSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one shard's statistics
    pub fn add(&mut self, stats: &ShardStats) {
        self.shard_count += 1;
        match stats.state {
            IndexState::Ready => self.ready_shards += 1,
            IndexState::Indexing => self.indexing_shards += 1,
            IndexState::Uninitialized => self.uninitialized_shards += 1,
        }
        self.total_partitions += stats.num_partitions;
        self.lookups += stats.lookups;
        self.partitions_scanned += stats.partitions_scanned;
        self.errors += stats.errors;

        if let Some(at) = stats.indexed_at {
            self.oldest_index = Some(self.oldest_index.map_or(at, |old| old.min(at)));
            self.newest_index = Some(self.newest_index.map_or(at, |new| new.max(at)));
        }
    }

    /// Add another summary to this one
    pub fn merge(&mut self, other: &Self) {
        self.shard_count += other.shard_count;
        self.ready_shards += other.ready_shards;
        self.indexing_shards += other.indexing_shards;
        self.uninitialized_shards += other.uninitialized_shards;
        self.total_partitions += other.total_partitions;
        self.lookups += other.lookups;
        self.partitions_scanned += other.partitions_scanned;
        self.errors += other.errors;

        if let Some(other_oldest) = other.oldest_index {
            self.oldest_index = Some(self.oldest_index.map_or(other_oldest, |old| old.min(other_oldest)));
        }
        if let Some(other_newest) = other.newest_index {
            self.newest_index = Some(self.newest_index.map_or(other_newest, |new| new.max(other_newest)));
        }
    }

    /// Calculate the average number of partitions per shard
    pub fn avg_partitions_per_shard(&self) -> f64 {
        if self.shard_count == 0 {
            return 0.0;
        }

        self.total_partitions as f64 / self.shard_count as f64
    }

    /// Create a human-readable report of statistics
    pub fn report(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Shard Statistics ===\n\n");

        result.push_str(&format!("Total Shards: {}\n", self.shard_count));
        result.push_str(&format!("  - Ready: {}\n", self.ready_shards));
        result.push_str(&format!("  - Indexing: {}\n", self.indexing_shards));
        result.push_str(&format!("  - Uninitialized: {}\n", self.uninitialized_shards));

        result.push_str(&format!("Total Partitions: {}\n", self.total_partitions));
        if self.shard_count > 0 {
            result.push_str(&format!("Avg. Partitions per Shard: {:.2}\n", self.avg_partitions_per_shard()));
        }
        result.push_str(&format!("Lookups: {}\n", self.lookups));
        result.push_str(&format!("Partitions Scanned: {}\n", self.partitions_scanned));
        result.push_str(&format!("Errors: {}\n", self.errors));

        if let Some(oldest) = self.oldest_index {
            result.push_str(&format!("Oldest Index: {}\n", oldest));
        }

        if let Some(newest) = self.newest_index {
            result.push_str(&format!("Newest Index: {}\n", newest));
        }

        result
    }
}
