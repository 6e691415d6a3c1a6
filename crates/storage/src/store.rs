use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;

/// Append-only document collection.
///
/// Implementations must tolerate concurrent callers; the detector only ever
/// inserts and never reads back.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Collection name, used in logs.
    fn collection(&self) -> &str;

    /// Append one document.
    async fn insert(&self, doc: &Value) -> Result<(), StorageError>;

    /// Check that the store can accept writes.
    async fn ping(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn collection(&self) -> &str {
        (**self).collection()
    }

    async fn insert(&self, doc: &Value) -> Result<(), StorageError> {
        (**self).insert(doc).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        (**self).ping().await
    }
}
