//! Error types for the shard module
//!
//! Defines error types specific to shard registry and shard index operations.

use thiserror::Error;

use crate::dataset::{DatasetRef, ShardNumber};
use crate::store::StoreError;

/// Errors that can occur during shard operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardError {
    /// Shard was already set up for the dataset
    #[error("Shard {shard} of dataset {dataset} is already set up")]
    AlreadySetup {
        dataset: DatasetRef,
        shard: ShardNumber,
    },

    /// Shard was never set up on this node
    #[error("Shard {shard} of dataset {dataset} was never set up on this node")]
    NotSetUp {
        dataset: DatasetRef,
        shard: ShardNumber,
    },

    /// Shard is not, or no longer, assigned to this node
    #[error("Shard {shard} of dataset {dataset} is not assigned to this node")]
    NotAssigned {
        dataset: DatasetRef,
        shard: ShardNumber,
    },

    /// Shard index has not been recovered yet
    #[error("Index of shard {shard} of dataset {dataset} is not ready")]
    IndexNotReady {
        dataset: DatasetRef,
        shard: ShardNumber,
    },

    /// Request addressed a different shard than the one it was sent to
    #[error("Request for shard {actual} was sent to shard {expected}")]
    ShardMismatch {
        expected: ShardNumber,
        actual: ShardNumber,
    },

    /// Operation was cancelled by shutdown
    #[error("Operation on shard {shard} of dataset {dataset} was cancelled")]
    Cancelled {
        dataset: DatasetRef,
        shard: ShardNumber,
    },

    /// Backing store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for shard operations
pub type ShardResult<T> = std::result::Result<T, ShardError>;

impl ShardError {
    /// Create a new already-set-up error
    pub fn already_setup(dataset: DatasetRef, shard: ShardNumber) -> Self {
        Self::AlreadySetup { dataset, shard }
    }

    /// Create a new not-set-up error
    pub fn not_setup(dataset: DatasetRef, shard: ShardNumber) -> Self {
        Self::NotSetUp { dataset, shard }
    }

    /// Create a new not-assigned error
    pub fn not_assigned(dataset: DatasetRef, shard: ShardNumber) -> Self {
        Self::NotAssigned { dataset, shard }
    }

    /// Create a new index-not-ready error
    pub fn index_not_ready(dataset: DatasetRef, shard: ShardNumber) -> Self {
        Self::IndexNotReady { dataset, shard }
    }

    /// Create a new shard mismatch error
    pub fn shard_mismatch(expected: ShardNumber, actual: ShardNumber) -> Self {
        Self::ShardMismatch { expected, actual }
    }

    /// Create a new cancellation error
    pub fn cancelled(dataset: DatasetRef, shard: ShardNumber) -> Self {
        Self::Cancelled { dataset, shard }
    }

    /// Check if this is an already-set-up error
    pub fn is_already_setup(&self) -> bool {
        matches!(self, Self::AlreadySetup { .. })
    }

    /// Check if the shard is absent, either never set up or unassigned
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotSetUp { .. } | Self::NotAssigned { .. })
    }

    /// Check if this is a not-assigned error
    pub fn is_not_assigned(&self) -> bool {
        matches!(self, Self::NotAssigned { .. })
    }

    /// Check if this is a shard mismatch error
    pub fn is_shard_mismatch(&self) -> bool {
        matches!(self, Self::ShardMismatch { .. })
    }

    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if this is a backing store error
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Get a description of the error
    pub fn description(&self) -> String {
        match self {
            Self::AlreadySetup { .. } => "Shard already set up".to_string(),
            Self::NotSetUp { .. } => "Shard not set up".to_string(),
            Self::NotAssigned { .. } => "Shard not assigned".to_string(),
            Self::IndexNotReady { .. } => "Shard index not ready".to_string(),
            Self::ShardMismatch { .. } => "Shard mismatch".to_string(),
            Self::Cancelled { .. } => "Operation cancelled".to_string(),
            Self::Store(err) => format!("Store error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_error_creation() {
        // Test not assigned error
        let err = ShardError::not_assigned(DatasetRef::new("metrics_ds_5"), 3);
        assert!(matches!(&err, ShardError::NotAssigned { shard: 3, .. }));
        assert!(err.is_absent());
        assert!(err.is_not_assigned());
        assert_eq!(err.to_string(), "Shard 3 of dataset metrics_ds_5 is not assigned to this node");

        // Test mismatch error
        let err = ShardError::shard_mismatch(1, 2);
        assert!(err.is_shard_mismatch());
        assert_eq!(err.description(), "Shard mismatch");

        let err = ShardError::not_setup(DatasetRef::new("metrics_ds_60"), 4);
        assert!(err.is_absent());
        assert!(!err.is_not_assigned());
        assert_eq!(err.to_string(), "Shard 4 of dataset metrics_ds_60 was never set up on this node");
    }

    #[test]
    fn test_shard_error_from_store() {
        let err = ShardError::from(StoreError::unavailable("timeout"));
        assert!(err.is_store_error());
        assert_eq!(err.to_string(), "Backing store unavailable: timeout");
    }
}
