//! In-process store for tests and dry runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::store::DocumentStore;

/// Keeps documents in a vector. Cloning shares the same collection.
///
/// Failure and latency can be switched on to exercise the write policy.
#[derive(Clone)]
pub struct MemoryStore {
    collection: String,
    docs: Arc<Mutex<Vec<Value>>>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            docs: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
            delay: None,
        }
    }

    /// Sleep this long before every insert.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `insert` and `ping` fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn documents(&self) -> Vec<Value> {
        self.docs.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{} is offline", self.collection)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, doc: &Value) -> Result<(), StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        self.docs.lock().await.push(doc.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.check()
    }
}
