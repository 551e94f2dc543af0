//! Error handling for the downsample store
//!
//! This module provides the crate-level error type and result alias. Shard and
//! backing-store failures have their own enums and convert into [`Error`].

use thiserror::Error;

use crate::shard::ShardError;
use crate::store::StoreError;

/// Errors that can occur in downsample store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Errors raised by the shard registry or a shard index
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Errors raised by the backing column store
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation is not available on a read-only store
    #[error("Operation '{operation}' is unsupported for read-only store")]
    Unsupported {
        operation: &'static str,
    },

    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to label filter construction
    #[error("Filter error: {0}")]
    Filter(String),

    /// Dataset has no schema registered
    #[error("Schema error: {0}")]
    Schema(String),

    /// Errors related to serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for downsample store operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new unsupported-operation error
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new filter error
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter(message.into())
    }

    /// Create a new schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Check if this is an unsupported-operation error
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Check if the backing store was unavailable, whichever layer reported it
    pub fn is_store_unavailable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_unavailable(),
            Self::Shard(ShardError::Store(err)) => err.is_unavailable(),
            _ => false,
        }
    }

    /// Get the shard error, if this error came from the shard layer
    pub fn as_shard_error(&self) -> Option<&ShardError> {
        match self {
            Self::Shard(err) => Some(err),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Shard(ShardError::NotAssigned { .. }) => {
                Some("Shard assignment view is stale; refresh it and retry".to_string())
            }
            Self::Shard(ShardError::IndexNotReady { .. }) => {
                Some("Shard index has not been recovered yet".to_string())
            }
            Self::Unsupported { .. } => {
                Some("This store serves downsampled data only; route writes to the raw store".to_string())
            }
            _ if self.is_store_unavailable() => {
                Some("Backing store is unavailable; retry within the query budget".to_string())
            }
            _ => None,
        }
    }
}
