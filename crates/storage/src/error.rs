use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("write to '{collection}' timed out after {timeout:?}")]
    Timeout { collection: String, timeout: Duration },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
