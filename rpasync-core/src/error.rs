use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State error: {0}")]
    State(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("sync pass finished with {failures} failed operation(s)")]
    PassFailed { failures: usize },
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::State(e.to_string())
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;
