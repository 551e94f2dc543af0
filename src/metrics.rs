//! Per-shard operation counters and recovery timings

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use parking_lot::Mutex;

/// Per-shard operation counters
#[derive(Debug)]
pub struct ShardMetrics {
    // Query counts
    /// Number of partition lookups
    lookup_count: AtomicUsize,
    /// Number of partition scans started
    scan_count: AtomicUsize,
    /// Number of partitions streamed by scans
    partitions_scanned: AtomicUsize,
    /// Number of label name / value queries
    label_query_count: AtomicUsize,
    /// Number of filter queries (part keys or label values with filters)
    filter_query_count: AtomicUsize,
    /// Number of failed operations
    error_count: AtomicUsize,

    // Index recovery
    /// Number of completed index recoveries
    recovery_count: AtomicUsize,
    /// Number of failed or cancelled index recoveries
    recovery_failures: AtomicUsize,
    /// Total recovery duration in nanoseconds
    recovery_duration_ns: AtomicU64,
    /// Last successful recovery duration
    last_recovery_duration: Mutex<Duration>,
}

impl Default for ShardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            lookup_count: AtomicUsize::new(0),
            scan_count: AtomicUsize::new(0),
            partitions_scanned: AtomicUsize::new(0),
            label_query_count: AtomicUsize::new(0),
            filter_query_count: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),

            recovery_count: AtomicUsize::new(0),
            recovery_failures: AtomicUsize::new(0),
            recovery_duration_ns: AtomicU64::new(0),
            last_recovery_duration: Mutex::new(Duration::from_secs(0)),
        }
    }

    /// Increment lookup count
    pub fn increment_lookups(&self) {
        self.lookup_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment scan count
    pub fn increment_scans(&self) {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Add partitions streamed by a scan
    pub fn add_partitions_scanned(&self, count: usize) {
        self.partitions_scanned.fetch_add(count, Ordering::Relaxed);
    }

    /// Increment label query count
    pub fn increment_label_queries(&self) {
        self.label_query_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment filter query count
    pub fn increment_filter_queries(&self) {
        self.filter_query_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment error count
    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful recovery
    pub fn record_recovery(&self, duration: Duration) {
        self.recovery_count.fetch_add(1, Ordering::Relaxed);
        self.recovery_duration_ns.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        *self.last_recovery_duration.lock() = duration;
    }

    /// Record a failed or cancelled recovery
    pub fn record_recovery_failure(&self) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_lookup_count(&self) -> usize {
        self.lookup_count.load(Ordering::Relaxed)
    }

    pub fn get_scan_count(&self) -> usize {
        self.scan_count.load(Ordering::Relaxed)
    }

    pub fn get_partitions_scanned(&self) -> usize {
        self.partitions_scanned.load(Ordering::Relaxed)
    }

    pub fn get_label_query_count(&self) -> usize {
        self.label_query_count.load(Ordering::Relaxed)
    }

    pub fn get_filter_query_count(&self) -> usize {
        self.filter_query_count.load(Ordering::Relaxed)
    }

    pub fn get_error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn get_recovery_count(&self) -> usize {
        self.recovery_count.load(Ordering::Relaxed)
    }

    pub fn get_recovery_failures(&self) -> usize {
        self.recovery_failures.load(Ordering::Relaxed)
    }

    /// Get total recovery duration
    pub fn get_recovery_duration(&self) -> Duration {
        Duration::from_nanos(self.recovery_duration_ns.load(Ordering::Relaxed))
    }

    /// Get last successful recovery duration
    pub fn get_last_recovery_duration(&self) -> Duration {
        *self.last_recovery_duration.lock()
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.lookup_count.store(0, Ordering::Relaxed);
        self.scan_count.store(0, Ordering::Relaxed);
        self.partitions_scanned.store(0, Ordering::Relaxed);
        self.label_query_count.store(0, Ordering::Relaxed);
        self.filter_query_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);

        self.recovery_count.store(0, Ordering::Relaxed);
        self.recovery_failures.store(0, Ordering::Relaxed);
        self.recovery_duration_ns.store(0, Ordering::Relaxed);
        *self.last_recovery_duration.lock() = Duration::from_secs(0);
    }
}
