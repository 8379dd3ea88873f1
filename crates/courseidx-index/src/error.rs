use std::path::PathBuf;

use courseidx_core::{SourceError, StoreError};
use thiserror::Error;

/// Errors from the text stages: extraction, chunking, embedding.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

#[cfg(any(feature = "embedder-ollama", feature = "embedder-openai"))]
impl From<reqwest::Error> for IndexingError {
    fn from(e: reqwest::Error) -> Self {
        IndexingError::HttpError(e.to_string())
    }
}

/// Errors from running an indexing job.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The file could not be decoded into text.
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// An extractor rejected the file.
    #[error("Extraction failed for {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: IndexingError,
    },

    /// The embedder failed. Usually transient.
    #[error("Embedding failed for {path}: {source}")]
    Embedding {
        path: String,
        #[source]
        source: IndexingError,
    },

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Content source error: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

impl IndexError {
    /// Errors a group or collection job skips over instead of failing.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            IndexError::Parse { .. } | IndexError::Extraction { .. } | IndexError::Embedding { .. }
        )
    }

    /// Errors where the same input would fail again on retry.
    pub fn is_content_error(&self) -> bool {
        matches!(self, IndexError::Parse { .. } | IndexError::Extraction { .. })
    }
}

/// Errors from the job queue's own storage.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode job: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dead letter {0} not found")]
    DeadLetterNotFound(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors from the change watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Content root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher is not running")]
    NotRunning,

    #[error("Invalid watch configuration: {0}")]
    Config(String),

    #[error("Failed to watch: {0}")]
    Notify(#[from] notify::Error),

    #[error("Failed to enqueue: {0}")]
    Queue(#[from] QueueError),
}
