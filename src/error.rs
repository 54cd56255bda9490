use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job {job} is already bound to {binding}")]
    ResourceConflict { job: String, binding: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock file already exists: {}", path.display())]
    LockConflict { path: PathBuf },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
