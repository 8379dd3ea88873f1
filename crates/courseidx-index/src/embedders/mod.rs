mod stub;

pub use stub::StubEmbedder;

#[cfg(any(feature = "embedder-ollama", feature = "embedder-openai"))]
mod http;
#[cfg(any(feature = "embedder-ollama", feature = "embedder-openai"))]
pub use http::{ApiDialect, HttpEmbedder};

use std::sync::Arc;

use crate::{EmbeddingResult, IndexingError};
use async_trait::async_trait;
use courseidx_config::{EmbeddingConfig, EmbeddingProvider};
use serde::{Deserialize, Serialize};

/// Configuration for an embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// The model name to use.
    pub model: String,
    /// The expected embedding dimensions.
    pub dimensions: usize,
    /// API endpoint (for HTTP-based embedders).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// API key (for authenticated APIs).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Maximum batch size for embedding requests.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            endpoint: None,
            api_key: None,
            batch_size: default_batch_size(),
        }
    }
}

impl From<&EmbeddingConfig> for EmbedderConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        EmbedderConfig {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "stub".to_string()),
            dimensions: config.dimensions,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            batch_size: config.batch_size.max(1),
        }
    }
}

/// Trait for text embedding implementations.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[&str]) -> Result<EmbeddingResult, IndexingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, IndexingError> {
        let result = self.embed(&[text]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| IndexingError::EmbeddingError("No embedding returned".to_string()))
    }

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Get the model name.
    fn model(&self) -> &str;

    /// Get the embedder name.
    fn name(&self) -> &'static str;
}

/// Create an embedder for the configured provider.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, IndexingError> {
    let embedder_config = EmbedderConfig::from(config);
    match config.provider {
        EmbeddingProvider::Stub => Ok(Arc::new(StubEmbedder::new(config.dimensions))),
        #[cfg(feature = "embedder-ollama")]
        EmbeddingProvider::Ollama => {
            Ok(Arc::new(HttpEmbedder::new(ApiDialect::Ollama, embedder_config)?))
        },
        #[cfg(feature = "embedder-openai")]
        EmbeddingProvider::OpenAi => {
            Ok(Arc::new(HttpEmbedder::openai_from_env(embedder_config)?))
        },
        #[allow(unreachable_patterns)]
        other => {
            let _ = embedder_config;
            Err(IndexingError::EmbeddingError(format!(
                "Embedding provider {:?} is not compiled into this build",
                other
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_stub_embedder() {
        let config = EmbeddingConfig {
            dimensions: 16,
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.name(), "stub");
        assert_eq!(embedder.dimensions(), 16);
    }

    #[test]
    fn test_embedder_config_from_settings() {
        let settings = EmbeddingConfig {
            model: Some("nomic-embed-text".to_string()),
            batch_size: 0,
            ..Default::default()
        };
        let config = EmbedderConfig::from(&settings);
        assert_eq!(config.model, "nomic-embed-text");
        assert_eq!(config.batch_size, 1);
    }
}
