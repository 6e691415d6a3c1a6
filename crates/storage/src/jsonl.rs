//! One JSON document per line, one file per collection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::store::DocumentStore;

pub struct JsonlStore {
    collection: String,
    path: PathBuf,
    /// Opened on first use and reopened after a failed write.
    file: Mutex<Option<File>>,
}

impl JsonlStore {
    /// Store for `<data_dir>/<collection>.jsonl`. Nothing is touched on disk
    /// until the first `ping` or `insert`.
    pub fn new(data_dir: &Path, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let path = data_dir.join(format!("{collection}.jsonl"));
        Self {
            collection,
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File, StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        info!(path = %self.path.display(), collection = %self.collection, "opened collection file");
        Ok(file)
    }
}

#[async_trait]
impl DocumentStore for JsonlStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, doc: &Value) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(doc)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(StorageError::Unavailable(self.collection.clone()));
        };

        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // Drop the handle so the next insert reopens the file.
            *guard = None;
            return Err(e.into());
        }

        debug!(collection = %self.collection, bytes = line.len(), "document appended");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn appends_one_line_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path(), "anomaly_events");

        store.insert(&json!({"machine_id": "R6", "n": 1})).await.unwrap();
        store.insert(&json!({"machine_id": "R6", "n": 2})).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["n"], 2);
    }

    #[tokio::test]
    async fn ping_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonlStore::new(&nested, "model_audit_log");

        store.ping().await.unwrap();
        assert!(store.path().exists());
        assert_eq!(store.collection(), "model_audit_log");
    }

    #[tokio::test]
    async fn ping_fails_when_dir_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, "not a directory").unwrap();

        let store = JsonlStore::new(&blocker, "anomaly_events");
        assert!(store.ping().await.is_err());
        assert!(store.insert(&json!({})).await.is_err());
    }

    #[tokio::test]
    async fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        JsonlStore::new(dir.path(), "c").insert(&json!(1)).await.unwrap();
        JsonlStore::new(dir.path(), "c").insert(&json!(2)).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("c.jsonl")).unwrap();
        assert_eq!(raw, "1\n2\n");
    }
}
