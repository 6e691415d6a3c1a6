use plantwatch_bus::BusError;
use plantwatch_core::PlantwatchError;
use plantwatch_storage::StorageError;
use thiserror::Error;

/// A reading field that cannot be turned into a finite number.
#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("field '{field}' is not numeric: {raw}")]
    NotNumeric { field: &'static str, raw: String },

    #[error("field '{field}' is not finite")]
    NotFinite { field: &'static str },
}

/// Why a model artifact could not be loaded.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Layout(#[from] PlantwatchError),

    #[error("invalid artifact: {0}")]
    Invalid(String),
}

/// Per-message failure inside the stream loop. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("undecodable message: {0}")]
    Decode(#[from] BusError),

    #[error("malformed reading: {0}")]
    Feature(#[from] FeatureError),

    #[error("persistence failed: {0}")]
    Storage(#[from] StorageError),
}

/// A failed attempt to bring the stream up. Always retried.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("subscribe failed: {0}")]
    Bus(#[from] BusError),

    #[error("store unreachable: {0}")]
    Storage(#[from] StorageError),

    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ProcessError {
    /// Malformed input, as opposed to a failure while handling good input.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Feature(_))
    }
}
