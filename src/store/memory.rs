//! In-memory snapshot store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::{ensure_valid, SnapshotStore, StoreError};
use crate::types::{BatchType, UsersBatch};

/// Process-scoped store holding the last batch per type.
///
/// Inserting overwrites, so `all_by_type` returns at most one batch.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    batches: RwLock<HashMap<BatchType, UsersBatch>>,
}

impl InMemorySnapshotStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of types with a stored batch.
    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    /// True if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.batches.write().clear();
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    fn keeps_history(&self) -> bool {
        false
    }

    async fn insert(&self, batch: &UsersBatch, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_valid(batch.batch_type)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.batches.write().insert(batch.batch_type, batch.clone());
        Ok(())
    }

    async fn latest_by_type(&self, batch_type: BatchType) -> Result<Option<UsersBatch>, StoreError> {
        ensure_valid(batch_type)?;
        Ok(self.batches.read().get(&batch_type).cloned())
    }

    async fn all_by_type(&self, batch_type: BatchType) -> Result<Vec<UsersBatch>, StoreError> {
        ensure_valid(batch_type)?;
        Ok(self.batches.read().get(&batch_type).cloned().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::User;

    fn batch(batch_type: BatchType, ids: &[i64]) -> UsersBatch {
        UsersBatch::new(
            batch_type,
            ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_latest_round_trip() {
        let store = InMemorySnapshotStore::new();
        let b = batch(BatchType::Followers, &[1, 2, 3]);

        store.insert(&b, &CancellationToken::new()).await.unwrap();

        let latest = store.latest_by_type(BatchType::Followers).await.unwrap();
        assert_eq!(latest, Some(b));
    }

    #[tokio::test]
    async fn test_missing_type_is_no_data() {
        let store = InMemorySnapshotStore::new();
        assert_eq!(store.latest_by_type(BatchType::Followings).await.unwrap(), None);
        assert!(store.all_by_type(BatchType::Followings).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_overwrites_history() {
        let store = InMemorySnapshotStore::new();
        let cancel = CancellationToken::new();
        store.insert(&batch(BatchType::LostFollowers, &[1]), &cancel).await.unwrap();
        store.insert(&batch(BatchType::LostFollowers, &[2]), &cancel).await.unwrap();

        let all = store.all_by_type(BatchType::LostFollowers).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].users[0].id.get(), 2);
        assert!(!store.keeps_history());
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let store = InMemorySnapshotStore::new();
        let err = store
            .insert(&batch(BatchType::Unknown, &[1]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidBatchType(_)));
        assert!(matches!(
            store.latest_by_type(BatchType::Unknown).await,
            Err(StoreError::InvalidBatchType(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_insert_stores_nothing() {
        let store = InMemorySnapshotStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.insert(&batch(BatchType::Followers, &[1]), &cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert!(store.is_empty());
    }
}
