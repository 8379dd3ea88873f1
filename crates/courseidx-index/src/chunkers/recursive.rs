use std::ops::Range;

use super::{count_lines_to_offset, floor_char_boundary, Chunker, ChunkerConfig};
use crate::types::renumber;
use crate::{Chunk, IndexingError};
use async_trait::async_trait;

/// Markdown-aware splitter for lesson text.
///
/// Tries section headings first, then paragraphs, lines, sentences, words and
/// finally characters. Chunks are byte spans of the input, so offsets and line
/// numbers are exact. Overlap is taken from the text preceding each span.
pub struct RecursiveChunker {
    config: ChunkerConfig,
    separators: Vec<&'static str>,
}

impl RecursiveChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        RecursiveChunker {
            config,
            separators: vec!["\n## ", "\n### ", "\n\n", "\n", ". ", " ", ""],
        }
    }

    pub fn with_separators(mut self, separators: Vec<&'static str>) -> Self {
        self.separators = separators;
        self
    }

    /// Cut points inside `range`. Headings start the next piece, every other
    /// separator stays with the piece before it.
    fn pieces(text: &str, range: Range<usize>, separator: &str) -> Vec<Range<usize>> {
        let slice = &text[range.clone()];
        let mut cuts: Vec<usize> = if separator.is_empty() {
            slice.char_indices().skip(1).map(|(i, _)| i).collect()
        } else {
            let heading = separator.starts_with("\n#");
            slice
                .match_indices(separator)
                .map(|(i, _)| if heading { i + 1 } else { i + separator.len() })
                .collect()
        };
        cuts.push(slice.len());

        let mut pieces = Vec::with_capacity(cuts.len());
        let mut start = 0;
        for cut in cuts {
            if cut > start {
                pieces.push(range.start + start..range.start + cut);
                start = cut;
            }
        }
        pieces
    }

    fn split(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        if range.is_empty() {
            return;
        }
        let Some((separator, rest)) = separators.split_first() else {
            out.push(range);
            return;
        };

        let size = self.config.chunk_size;
        let flush = |span: Range<usize>, out: &mut Vec<Range<usize>>| {
            if span.len() > size && !rest.is_empty() {
                self.split(text, span, rest, out);
            } else if !span.is_empty() {
                out.push(span);
            }
        };

        let mut current = range.start..range.start;
        for piece in Self::pieces(text, range, separator) {
            if piece.end - current.start <= size {
                current.end = piece.end;
            } else {
                flush(current, out);
                current = piece;
            }
        }
        flush(current, out);
    }
}

#[async_trait]
impl Chunker for RecursiveChunker {
    async fn chunk(&self, text: &str) -> Result<Vec<Chunk>, IndexingError> {
        let mut spans = Vec::new();
        self.split(text, 0..text.len(), &self.separators, &mut spans);
        spans.retain(|span| !text[span.clone()].trim().is_empty());

        let last = spans.len().saturating_sub(1);
        let mut chunks = Vec::with_capacity(spans.len());
        for (i, span) in spans.into_iter().enumerate() {
            if span.len() < self.config.min_chunk_size && i != last {
                continue;
            }
            let start = if chunks.is_empty() {
                span.start
            } else {
                floor_char_boundary(text, span.start.saturating_sub(self.config.chunk_overlap))
            };
            chunks.push(Chunk::new(
                text[start..span.end].to_string(),
                start,
                span.end,
                count_lines_to_offset(text, start),
                count_lines_to_offset(text, span.end),
            ));
        }

        renumber(&mut chunks);
        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "recursive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recursive_chunker_paragraphs() {
        let config = ChunkerConfig {
            chunk_size: 30,
            chunk_overlap: 0,
            min_chunk_size: 5,
        };
        let chunker = RecursiveChunker::new(config);

        let text = "First paragraph with content.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = chunker.chunk(text).await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("First paragraph"));
        assert!(chunks[1].content.starts_with("Second paragraph"));
        assert_eq!(chunks[2].content, "Third one.");
        assert_eq!(chunks[2].start_line, 5);
    }

    #[tokio::test]
    async fn test_headings_start_chunks() {
        let config = ChunkerConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            min_chunk_size: 1,
        };
        let chunker = RecursiveChunker::new(config);

        let text = "# Intro\nText about intro.\n## Part one\nBody one here.\n## Part two\nBody two.";
        let chunks = chunker.chunk(text).await.unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].content.starts_with("# Intro"));
        assert!(chunks[1].content.starts_with("## Part one"));
        assert!(chunks[2].content.starts_with("## Part two"));
        assert_eq!(chunks[1].start_line, 3);
    }

    #[tokio::test]
    async fn test_recursive_chunker_long_text_with_overlap() {
        let config = ChunkerConfig {
            chunk_size: 50,
            chunk_overlap: 10,
            min_chunk_size: 10,
        };
        let chunker = RecursiveChunker::new(config);

        let text = "This is a long sentence that should be split. And another one here. Plus more text to fill it out.";
        let chunks = chunker.chunk(text).await.unwrap();

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.content.len() <= 60);
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.content);
            assert_eq!(chunk.chunk_index, i);
            assert_eq!(chunk.total_chunks, chunks.len());
        }
        assert!(chunks[1].start_offset < chunks[0].end_offset);
    }

    #[tokio::test]
    async fn test_recursive_chunker_multibyte_overlap() {
        let config = ChunkerConfig {
            chunk_size: 12,
            chunk_overlap: 3,
            min_chunk_size: 1,
        };
        let chunker = RecursiveChunker::new(config);

        let text = "héllo wörld ünïcode çhunks";
        let chunks = chunker.chunk(text).await.unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(&text[chunk.start_offset..chunk.end_offset], chunk.content);
        }
    }

    #[tokio::test]
    async fn test_recursive_chunker_empty_text() {
        let chunker = RecursiveChunker::new(ChunkerConfig::default());
        assert!(chunker.chunk("").await.unwrap().is_empty());
        assert!(chunker.chunk("\n\n  \n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recursive_chunker_small_text() {
        let config = ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 0,
            min_chunk_size: 50,
        };
        let chunker = RecursiveChunker::new(config);

        let text = "Small text.";
        let chunks = chunker.chunk(text).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, text);
        assert_eq!(chunks[0].total_chunks, 1);
    }
}
