//! Dataset identities and downsample resolution routing
//!
//! A raw dataset is downsampled into one derived dataset per configured
//! resolution. The derived names are persisted and compared by other
//! components, so the naming rule here must never change.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shard number within a dataset's shard space
pub type ShardNumber = u32;

/// Separator between the raw dataset name and the resolution suffix
pub const DOWNSAMPLE_SEPARATOR: &str = "_ds_";

/// Identity of a logical dataset, raw or downsampled
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Dataset name
    pub dataset: String,
    /// Optional database namespace
    pub database: Option<String>,
}

impl DatasetRef {
    /// Create a dataset reference without a database namespace
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            database: None,
        }
    }

    /// Create a dataset reference inside a database namespace
    pub fn in_database(dataset: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            database: Some(database.into()),
        }
    }

    /// Whether this name follows the downsampled naming rule
    pub fn is_downsampled(&self) -> bool {
        self.dataset
            .rsplit_once(DOWNSAMPLE_SEPARATOR)
            .map_or(false, |(_, suffix)| suffix.parse::<u32>().is_ok())
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{}.{}", db, self.dataset),
            None => write!(f, "{}", self.dataset),
        }
    }
}

/// Downsampling granularity, always a whole number of minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Resolution(u32);

impl Resolution {
    /// Create a resolution of `minutes` minutes
    ///
    /// Zero is rejected because it has no meaning as a granularity.
    pub fn minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(Error::config("Resolution must be at least one minute"));
        }
        Ok(Self(minutes))
    }

    /// Resolution in minutes
    pub fn as_minutes(&self) -> u32 {
        self.0
    }

    /// Resolution as a duration
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0 as u64 * 60)
    }
}

impl TryFrom<Duration> for Resolution {
    type Error = Error;

    fn try_from(duration: Duration) -> Result<Self> {
        if duration.subsec_nanos() != 0 || duration.as_secs() % 60 != 0 {
            return Err(Error::config(format!(
                "Resolution {:?} is not a whole number of minutes",
                duration
            )));
        }
        let minutes = u32::try_from(duration.as_secs() / 60)
            .map_err(|_| Error::config(format!("Resolution {:?} is too large", duration)))?;
        Self::minutes(minutes)
    }
}

impl TryFrom<u32> for Resolution {
    type Error = Error;

    fn try_from(minutes: u32) -> Result<Self> {
        Self::minutes(minutes)
    }
}

impl From<Resolution> for u32 {
    fn from(resolution: Resolution) -> u32 {
        resolution.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.0)
    }
}

/// Name of the dataset holding `raw` downsampled at `resolution`
pub fn downsample_dataset_ref(raw: &DatasetRef, resolution: Resolution) -> DatasetRef {
    DatasetRef {
        dataset: format!("{}{}{}", raw.dataset, DOWNSAMPLE_SEPARATOR, resolution.as_minutes()),
        database: raw.database.clone(),
    }
}

/// Map every resolution to the identity of its derived dataset
pub fn downsample_dataset_refs<I>(raw: &DatasetRef, resolutions: I) -> BTreeMap<Resolution, DatasetRef>
where
    I: IntoIterator<Item = Resolution>,
{
    resolutions
        .into_iter()
        .map(|res| (res, downsample_dataset_ref(raw, res)))
        .collect()
}
