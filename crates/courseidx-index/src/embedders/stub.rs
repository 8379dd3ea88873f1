use super::Embedder;
use crate::{EmbeddingResult, IndexingError};
use async_trait::async_trait;

/// Offline embedder producing deterministic unit vectors from a BLAKE3 hash
/// of the text. Equal texts get equal vectors; no network is touched.
pub struct StubEmbedder {
    dimensions: usize,
}

impl StubEmbedder {
    pub fn new(dimensions: usize) -> Self {
        StubEmbedder { dimensions }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
        let mut bytes = vec![0u8; self.dimensions * 2];
        reader.fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| {
                let raw = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                raw / u16::MAX as f32 * 2.0 - 1.0
            })
            .collect();

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<EmbeddingResult, IndexingError> {
        let embeddings = texts.iter().map(|t| self.vector_for(t)).collect();

        Ok(EmbeddingResult {
            embeddings,
            token_count: None,
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        "stub"
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_embedder() {
        let embedder = StubEmbedder::new(384);

        let result = embedder.embed(&["hello", "world", "hello"]).await.unwrap();

        assert_eq!(result.embeddings.len(), 3);
        assert_eq!(result.embeddings[0].len(), 384);
        assert_eq!(result.embeddings[0], result.embeddings[2]);
        assert_ne!(result.embeddings[0], result.embeddings[1]);
    }

    #[tokio::test]
    async fn test_stub_vectors_are_normalized() {
        let embedder = StubEmbedder::new(64);
        let v = embedder.embed_one("ownership and borrowing").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
