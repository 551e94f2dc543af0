//! Configuration for the downsample store
//!
//! Both structures are passed through at shard setup; loading them from disk
//! is left to the embedding service.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::{downsample_dataset_refs, DatasetRef, Resolution};
use crate::error::{Error, Result};

/// Shard storage and query tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct StoreConfig {
    /// Number of part key records read per page during index recovery
    pub part_key_page_size: usize,
    /// Limit applied by callers that do not pass one
    pub default_query_limit: usize,
    /// Worker count for filter evaluation over large candidate lists
    pub partition_list_parallelism: usize,
    /// Candidate count above which filter evaluation goes parallel
    pub parallel_lookup_threshold: usize,
    /// Whether chunk data is paged in on demand
    pub demand_paging_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            part_key_page_size: 10_000,
            default_query_limit: 1000,
            partition_list_parallelism: 4,
            parallel_lookup_threshold: 50_000,
            demand_paging_enabled: true,
        }
    }
}

impl StoreConfig {
    /// Create a new store configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recovery page size
    pub fn with_part_key_page_size(mut self, size: usize) -> Self {
        self.part_key_page_size = size;
        self
    }

    /// Set the default query limit
    pub fn with_default_query_limit(mut self, limit: usize) -> Self {
        self.default_query_limit = limit;
        self
    }

    /// Set the filter evaluation parallelism
    pub fn with_partition_list_parallelism(mut self, parallelism: usize) -> Self {
        self.partition_list_parallelism = parallelism;
        self
    }

    /// Set the candidate count at which lookups go parallel
    pub fn with_parallel_lookup_threshold(mut self, threshold: usize) -> Self {
        self.parallel_lookup_threshold = threshold;
        self
    }

    /// Set whether chunk data is paged in on demand
    pub fn with_demand_paging(mut self, enabled: bool) -> Self {
        self.demand_paging_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.part_key_page_size < 1 {
            return Err(Error::config("Part key page size must be at least 1"));
        }

        if self.default_query_limit < 1 {
            return Err(Error::config("Default query limit must be at least 1"));
        }

        if self.partition_list_parallelism < 1 {
            return Err(Error::config("Partition list parallelism must be at least 1"));
        }

        Ok(())
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Downsampling setup of a raw dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct DownsampleConfig {
    /// Whether downsampled datasets are served
    pub enabled: bool,
    /// Name of the raw dataset being downsampled
    pub raw_dataset_name: String,
    /// Resolutions, finest first
    pub resolutions: Vec<Resolution>,
    /// Retention of each resolution in days, matched by position
    pub ttl_days: Vec<u32>,
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            raw_dataset_name: "prometheus".to_string(),
            resolutions: Vec::new(),
            ttl_days: Vec::new(),
        }
    }
}

impl DownsampleConfig {
    pub fn new(raw_dataset_name: impl Into<String>) -> Self {
        Self {
            raw_dataset_name: raw_dataset_name.into(),
            ..Self::default()
        }
    }

    /// Enable downsampling
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a resolution with its retention
    pub fn with_resolution(mut self, resolution: Resolution, ttl_days: u32) -> Self {
        self.resolutions.push(resolution);
        self.ttl_days.push(ttl_days);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Retentions pair with resolutions by position even while disabled
        if self.resolutions.len() != self.ttl_days.len() {
            return Err(Error::config(format!(
                "Got {} resolutions but {} ttls",
                self.resolutions.len(),
                self.ttl_days.len()
            )));
        }

        if !self.enabled {
            return Ok(());
        }

        if self.raw_dataset_name.is_empty() {
            return Err(Error::config("Raw dataset name must not be empty"));
        }

        if self.resolutions.is_empty() {
            return Err(Error::config("At least one resolution is required when downsampling is enabled"));
        }

        if self.resolutions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::config("Resolutions must be distinct and in ascending order"));
        }

        if self.ttl_days.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::config("Coarser resolutions must not be retained for less time"));
        }

        if self.ttl_days.iter().any(|d| *d == 0) {
            return Err(Error::config("Retention must be at least one day"));
        }

        Ok(())
    }

    /// Raw dataset identity
    pub fn raw_dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.raw_dataset_name.clone())
    }

    /// Derived dataset of every configured resolution
    pub fn downsampled_datasets(&self) -> BTreeMap<Resolution, DatasetRef> {
        downsample_dataset_refs(&self.raw_dataset_ref(), self.resolutions.iter().copied())
    }

    /// Retention of a resolution, if configured
    pub fn ttl(&self, resolution: Resolution) -> Option<Duration> {
        self.resolutions
            .iter()
            .position(|r| *r == resolution)
            .and_then(|i| self.ttl_days.get(i))
            .map(|days| Duration::from_secs(*days as u64 * 24 * 60 * 60))
    }

    /// Finest resolution whose retention still covers `query_start`
    ///
    /// Falls back to the coarsest resolution when none does, since it holds
    /// the oldest data available.
    pub fn choose_resolution(&self, query_start: DateTime<Utc>, now: DateTime<Utc>) -> Option<Resolution> {
        let age = now.signed_duration_since(query_start);
        self.resolutions
            .iter()
            .zip(&self.ttl_days)
            .find(|(_, ttl)| age <= chrono::Duration::days(**ttl as i64))
            .map(|(res, _)| *res)
            .or_else(|| self.resolutions.last().copied())
    }

    /// Parse and validate a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a human-readable string representation of the configuration
    pub fn to_string_pretty(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Downsample Configuration ===\n\n");
        result.push_str(&format!("Enabled: {}\n", self.enabled));
        result.push_str(&format!("Raw Dataset: {}\n", self.raw_dataset_name));

        for (res, dataset) in self.downsampled_datasets() {
            let ttl = self.ttl(res).map(|d| d.as_secs() / 86_400).unwrap_or_default();
            result.push_str(&format!("  - {} -> {} (ttl {} days)\n", res, dataset, ttl));
        }

        result
    }
}
