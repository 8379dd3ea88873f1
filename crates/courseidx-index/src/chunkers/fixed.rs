use super::{ceil_char_boundary, count_lines_to_offset, floor_char_boundary, Chunker, ChunkerConfig};
use crate::types::renumber;
use crate::{Chunk, IndexingError};
use async_trait::async_trait;

/// Fixed-size chunker that splits text into windows of roughly `chunk_size`
/// bytes, stepping by `chunk_size - chunk_overlap`.
pub struct FixedChunker {
    config: ChunkerConfig,
}

impl FixedChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        FixedChunker { config }
    }
}

#[async_trait]
impl Chunker for FixedChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<Chunk>, IndexingError> {
        let text_len = text.len();
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.config.chunk_size.max(1);
        let step = chunk_size.saturating_sub(self.config.chunk_overlap).max(1);

        let mut windows = Vec::new();
        let mut start = 0;
        while start < text_len {
            let mut end = floor_char_boundary(text, start + chunk_size);
            if end <= start {
                end = ceil_char_boundary(text, start + 1);
            }
            windows.push((start, end));
            if end == text_len {
                break;
            }
            start = ceil_char_boundary(text, start + step);
        }

        let last = windows.len().saturating_sub(1);
        let mut chunks: Vec<Chunk> = windows
            .into_iter()
            .enumerate()
            .filter(|(i, (s, e))| *i == 0 || *i == last || e - s >= self.config.min_chunk_size)
            .map(|(_, (s, e))| {
                Chunk::new(
                    text[s..e].to_string(),
                    s,
                    e,
                    count_lines_to_offset(text, s),
                    count_lines_to_offset(text, e),
                )
            })
            .collect();

        renumber(&mut chunks);
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_chunker() {
        let config = ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 20,
            min_chunk_size: 10,
        };
        let chunker = FixedChunker::new(config);

        let text = "a".repeat(250);
        let chunks = chunker.chunk(&text).await.unwrap();

        // windows start at 0, 80, 160
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.len(), 100);
        assert_eq!(chunks[1].start_offset, 80);
        assert_eq!(chunks[2].end_offset, 250);
        assert!(chunks.iter().all(|c| c.total_chunks == 3));
        assert_eq!(chunks[2].chunk_index, 2);
    }

    #[tokio::test]
    async fn test_small_text() {
        let chunker = FixedChunker::new(ChunkerConfig::default());

        let text = "Hello, world!";
        let chunks = chunker.chunk(text).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
    }

    #[tokio::test]
    async fn test_empty_text() {
        let chunker = FixedChunker::new(ChunkerConfig::default());
        assert!(chunker.chunk("").await.unwrap().is_empty());
        assert!(chunker.chunk("  \n ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multibyte_text_not_split_inside_char() {
        let config = ChunkerConfig {
            chunk_size: 5,
            chunk_overlap: 1,
            min_chunk_size: 1,
        };
        let chunker = FixedChunker::new(config);
        let text = "ééééééééé";
        let chunks = chunker.chunk(text).await.unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.content.chars().all(|c| c == 'é'));
        }
    }
}
