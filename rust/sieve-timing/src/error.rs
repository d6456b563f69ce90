use std::path::PathBuf;

/// Errors surfaced by the timing harness.
///
/// Per-task worker failures never show up here: they degrade to an `NA`
/// outcome inside the batch. These variants cover setup and I/O.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to launch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Invalid input on line {line}: {reason}")]
    InvalidInput { line: usize, reason: String },

    #[error("Invalid timing record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
