use std::path::Path;

use crate::types::{CourseIdxConfig, EmbeddingProvider, StoreKind};

/// Directory under the content root that holds queue and store files.
pub const STATE_DIR: &str = ".courseidx";

impl CourseIdxConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // 1. Extensions are compared without the dot, lowercase
        for ext in self
            .content
            .extensions
            .iter_mut()
            .chain(self.layout.structured_extensions.iter_mut())
        {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }

        // 2. State files live next to the content unless placed explicitly
        let state_dir = Path::new(&self.content.root).join(STATE_DIR);
        if self.queue.path.is_none() {
            self.queue.path = Some(state_dir.join("queue.db").to_string_lossy().into_owned());
        }
        if self.store.kind == StoreKind::Sqlite && self.store.path.is_none() {
            self.store.path = Some(
                state_dir
                    .join("vectors.db")
                    .to_string_lossy()
                    .into_owned(),
            );
        }

        // 3. Model name inference from provider
        if self.pipeline.embedding.model.is_none() {
            self.pipeline.embedding.model = default_model(self.pipeline.embedding.provider);
        }

        // 4. HTTP endpoint inference from provider
        if self.pipeline.embedding.endpoint.is_none() {
            self.pipeline.embedding.endpoint = default_endpoint(self.pipeline.embedding.provider);
        }
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> CourseIdxConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }
}

fn default_model(provider: EmbeddingProvider) -> Option<String> {
    match provider {
        EmbeddingProvider::Stub => None,
        EmbeddingProvider::Ollama => Some("nomic-embed-text".to_string()),
        EmbeddingProvider::OpenAi => Some("text-embedding-3-small".to_string()),
    }
}

fn default_endpoint(provider: EmbeddingProvider) -> Option<String> {
    match provider {
        EmbeddingProvider::Stub => None,
        EmbeddingProvider::Ollama => Some("http://localhost:11434".to_string()),
        EmbeddingProvider::OpenAi => Some("https://api.openai.com/v1".to_string()),
    }
}
