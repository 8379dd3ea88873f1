use std::time::Duration;

use super::{Embedder, EmbedderConfig};
use crate::{EmbeddingResult, IndexingError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;

/// Wire format of an embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    /// `POST {endpoint}/api/embed`, answers `{"embeddings": [[..]]}`.
    #[cfg(feature = "embedder-ollama")]
    Ollama,
    /// `POST {endpoint}/embeddings`, answers `{"data": [{"index", "embedding"}]}`.
    #[cfg(feature = "embedder-openai")]
    OpenAi,
}

impl ApiDialect {
    fn default_endpoint(self) -> &'static str {
        match self {
            #[cfg(feature = "embedder-ollama")]
            ApiDialect::Ollama => "http://localhost:11434",
            #[cfg(feature = "embedder-openai")]
            ApiDialect::OpenAi => "https://api.openai.com/v1",
        }
    }

    fn path(self) -> &'static str {
        match self {
            #[cfg(feature = "embedder-ollama")]
            ApiDialect::Ollama => "api/embed",
            #[cfg(feature = "embedder-openai")]
            ApiDialect::OpenAi => "embeddings",
        }
    }

    fn label(self) -> &'static str {
        match self {
            #[cfg(feature = "embedder-ollama")]
            ApiDialect::Ollama => "ollama",
            #[cfg(feature = "embedder-openai")]
            ApiDialect::OpenAi => "openai",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Ollama {
        embeddings: Vec<Vec<f32>>,
    },
    OpenAi {
        data: Vec<IndexedEmbedding>,
        #[serde(default)]
        usage: Option<Usage>,
    },
}

#[derive(Deserialize)]
struct IndexedEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<usize>,
}

/// Embedder backed by an HTTP embedding service.
///
/// Every returned vector is checked against the configured dimensions so a
/// model swap cannot silently mix vector sizes in one store.
pub struct HttpEmbedder {
    dialect: ApiDialect,
    config: EmbedderConfig,
    client: reqwest::Client,
    url: String,
}

impl HttpEmbedder {
    pub fn new(dialect: ApiDialect, config: EmbedderConfig) -> Result<Self, IndexingError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                IndexingError::EmbeddingError("api_key is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let base = config
            .endpoint
            .as_deref()
            .unwrap_or(dialect.default_endpoint())
            .trim_end_matches('/');
        let url = format!("{}/{}", base, dialect.path());

        Ok(HttpEmbedder {
            dialect,
            config,
            client,
            url,
        })
    }

    /// Build an OpenAI-compatible embedder, reading `OPENAI_API_KEY` when no key is configured.
    #[cfg(feature = "embedder-openai")]
    pub fn openai_from_env(mut config: EmbedderConfig) -> Result<Self, IndexingError> {
        if config.api_key.is_none() {
            config.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        Self::new(ApiDialect::OpenAi, config)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, batch: &[&str]) -> serde_json::Value {
        match self.dialect {
            #[cfg(feature = "embedder-ollama")]
            ApiDialect::Ollama => json!({ "model": self.config.model, "input": batch }),
            #[cfg(feature = "embedder-openai")]
            ApiDialect::OpenAi => json!({
                "model": self.config.model,
                "input": batch,
                "dimensions": self.config.dimensions,
            }),
        }
    }

    async fn embed_batch(
        &self,
        batch: &[&str],
    ) -> Result<(Vec<Vec<f32>>, Option<usize>), IndexingError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.request_body(batch))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexingError::EmbeddingError(format!(
                "{} returned {}: {}",
                self.dialect.label(),
                status,
                body.trim()
            )));
        }

        let (vectors, tokens) = match response.json::<EmbedResponse>().await? {
            EmbedResponse::Ollama { embeddings } => (embeddings, None),
            EmbedResponse::OpenAi { mut data, usage } => {
                data.sort_by_key(|d| d.index);
                let tokens = usage.and_then(|u| u.total_tokens);
                (data.into_iter().map(|d| d.embedding).collect(), tokens)
            }
        };
        check_vectors(&vectors, batch.len(), self.config.dimensions)?;
        Ok((vectors, tokens))
    }
}

fn check_vectors(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Result<(), IndexingError> {
    if vectors.len() != expected {
        return Err(IndexingError::EmbeddingError(format!(
            "got {} embeddings for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(IndexingError::EmbeddingError(format!(
            "embedding has {} dimensions, expected {}",
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<EmbeddingResult, IndexingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        let mut token_count = None;

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let (vectors, tokens) = self.embed_batch(batch).await?;
            embeddings.extend(vectors);
            if let Some(tokens) = tokens {
                *token_count.get_or_insert(0) += tokens;
            }
        }

        Ok(EmbeddingResult {
            embeddings,
            token_count,
        })
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &'static str {
        self.dialect.label()
    }
}
