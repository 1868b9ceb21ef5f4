//! Snapshot storage backends.
//!
//! Two backends share one capability set but differ on history:
//! [`InMemorySnapshotStore`] keeps only the last batch per type, while
//! `PostgresSnapshotStore` appends every batch. Anything that needs history
//! (the diff-history operations) gets at most one batch per type from the
//! in-memory backend.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{BatchType, UsersBatch};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `Unknown` or unparseable batch type at the boundary.
    #[error("invalid batch type: {0}")]
    InvalidBatchType(String),
    /// The caller cancelled before the write committed. Nothing was stored.
    #[error("store write cancelled")]
    Cancelled,
    /// A stored document could not be decoded.
    #[error("corrupt document: {0}")]
    Corrupt(String),
    /// Backend configuration problem.
    #[error("store configuration: {0}")]
    Config(String),
    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Reject `Unknown` at the store boundary.
pub fn ensure_valid(batch_type: BatchType) -> Result<(), StoreError> {
    if batch_type.is_valid() {
        Ok(())
    } else {
        Err(StoreError::InvalidBatchType(batch_type.to_string()))
    }
}

/// Trait for snapshot storage backends.
///
/// "No data" is `Ok(None)` from [`latest_by_type`](Self::latest_by_type);
/// callers treat it as "no previous snapshot".
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Whether [`all_by_type`](Self::all_by_type) returns full history.
    fn keeps_history(&self) -> bool;

    /// Persist a batch. Either the whole batch is stored or nothing is.
    async fn insert(&self, batch: &UsersBatch, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Most recent batch of `batch_type`.
    async fn latest_by_type(&self, batch_type: BatchType) -> Result<Option<UsersBatch>, StoreError>;

    /// Every batch of `batch_type`, newest first.
    async fn all_by_type(&self, batch_type: BatchType) -> Result<Vec<UsersBatch>, StoreError>;
}

pub use memory::InMemorySnapshotStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresSnapshotStore, DocumentStoreConfig};
