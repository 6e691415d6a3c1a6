use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlantwatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feature layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Config error: {0}")]
    Config(String),
}
