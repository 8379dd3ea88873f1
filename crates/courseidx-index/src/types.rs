use serde::{Deserialize, Serialize};

/// A chunk of text extracted from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The text content of the chunk.
    pub content: String,
    /// Start byte offset in the extracted text.
    pub start_offset: usize,
    /// End byte offset in the extracted text.
    pub end_offset: usize,
    /// Start line number (1-indexed).
    pub start_line: usize,
    /// End line number (1-indexed).
    pub end_line: usize,
    /// Chunk index within the file (0-indexed).
    pub chunk_index: usize,
    /// Total number of chunks from this file.
    pub total_chunks: usize,
}

impl Chunk {
    pub fn new(
        content: String,
        start_offset: usize,
        end_offset: usize,
        start_line: usize,
        end_line: usize,
    ) -> Self {
        Chunk {
            content,
            start_offset,
            end_offset,
            start_line,
            end_line,
            chunk_index: 0,
            total_chunks: 0,
        }
    }
}

/// Number chunks sequentially once filtering is done.
pub(crate) fn renumber(chunks: &mut [Chunk]) {
    let total = chunks.len();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
        chunk.total_chunks = total;
    }
}

/// Result of embedding a batch of texts.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The embeddings, one per input text.
    pub embeddings: Vec<Vec<f32>>,
    /// Number of tokens processed (if available).
    pub token_count: Option<usize>,
}
