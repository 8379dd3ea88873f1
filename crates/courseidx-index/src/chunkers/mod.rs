mod fixed;
mod recursive;

pub use fixed::FixedChunker;
pub use recursive::RecursiveChunker;

use std::sync::Arc;

use crate::{Chunk, IndexingError};
use async_trait::async_trait;
use courseidx_config::{ChunkStrategy, PipelineSettings};
use serde::{Deserialize, Serialize};

/// Configuration for a chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Target chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between chunks in bytes.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Chunks smaller than this are dropped unless they are the last one.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_min_chunk_size() -> usize {
    50
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

impl From<&PipelineSettings> for ChunkerConfig {
    fn from(settings: &PipelineSettings) -> Self {
        ChunkerConfig {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            min_chunk_size: settings.min_chunk_size,
        }
    }
}

/// Trait for text chunking implementations.
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Split text into chunks, numbered from 0.
    async fn chunk(&self, text: &str) -> Result<Vec<Chunk>, IndexingError>;

    /// Get the name of this chunker.
    fn name(&self) -> &'static str;
}

/// Create a chunker for the configured strategy.
pub fn create_chunker(
    strategy: ChunkStrategy,
    config: ChunkerConfig,
) -> Result<Arc<dyn Chunker>, IndexingError> {
    if config.chunk_size == 0 {
        return Err(IndexingError::ChunkingError(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    match strategy {
        ChunkStrategy::Fixed => Ok(Arc::new(FixedChunker::new(config))),
        ChunkStrategy::Recursive => Ok(Arc::new(RecursiveChunker::new(config))),
    }
}

/// Helper to count lines up to a byte offset.
pub fn count_lines_to_offset(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset.min(text.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

pub(crate) fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub(crate) fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
