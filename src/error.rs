use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. These are raised before any log line is read, and no
/// output is written when one occurs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Log directory '{}' does not exist", .path.display())]
    MissingDirectory { path: PathBuf },

    #[error("Log path '{}' is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Log directory '{}' is not readable: {message}", .path.display())]
    UnreadableDirectory { path: PathBuf, message: String },

    #[error("No .log files found in '{}'", .path.display())]
    NoLogFiles { path: PathBuf },

    #[error("Unknown log format '{value}'. Expected one of: auto, apache, linux")]
    InvalidLogFormat { value: String },

    #[error("Unknown embedding backend '{value}'. Expected one of: ollama, hashing")]
    InvalidEmbeddingBackend { value: String },
}

/// Counters for failures that were absorbed instead of aborting the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub unreadable_files: usize,
    pub decode_failures: usize,
    pub dropped_by_cap: usize,
    pub low_confidence_embeddings: usize,
    pub distance_failures: usize,
    pub summary_fallbacks: usize,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}
