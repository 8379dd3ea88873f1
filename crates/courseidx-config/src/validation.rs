use globset::Glob;
use regex::Regex;

use crate::types::{CourseIdxConfig, EmbeddingProvider, StoreKind};
use crate::ConfigError;

impl CourseIdxConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.content.root.trim().is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "content.root must not be empty".to_string(),
            ));
        }

        if self.content.extensions.is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "content.extensions must list at least one extension".to_string(),
            ));
        }

        if self.content.max_depth == 0 {
            errors.push(ConfigError::InvalidConfig(
                "content.max_depth must be at least 1".to_string(),
            ));
        }

        for pattern in &self.content.ignore {
            if let Err(e) = Glob::new(pattern) {
                errors.push(ConfigError::InvalidPattern(pattern.clone(), e.to_string()));
            }
        }

        for pattern in [
            &self.layout.group_pattern,
            &self.layout.item_pattern,
            &self.layout.index_pattern,
        ] {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ConfigError::InvalidPattern(pattern.clone(), e.to_string()));
            }
        }

        if self.watch.debounce.as_duration().is_zero() {
            errors.push(ConfigError::InvalidConfig(
                "watch.debounce must be greater than zero".to_string(),
            ));
        }

        if self.watch.event_buffer == 0 || self.queue.event_buffer == 0 {
            errors.push(ConfigError::InvalidConfig(
                "event buffers must hold at least one event".to_string(),
            ));
        }

        if self.queue.concurrency == 0 {
            errors.push(ConfigError::InvalidConfig(
                "queue.concurrency must be at least 1".to_string(),
            ));
        }

        if self.queue.max_attempts == 0 || self.queue.collection_max_attempts == 0 {
            errors.push(ConfigError::InvalidConfig(
                "queue attempt limits must be at least 1".to_string(),
            ));
        }

        if self.queue.dead_letter_cap == 0 {
            errors.push(ConfigError::InvalidConfig(
                "queue.dead_letter_cap must be at least 1".to_string(),
            ));
        }

        if self.queue.backoff_base.as_duration() > self.queue.backoff_max.as_duration() {
            errors.push(ConfigError::InvalidConfig(format!(
                "queue.backoff_base ({}) exceeds queue.backoff_max ({})",
                self.queue.backoff_base, self.queue.backoff_max
            )));
        }

        if self.queue.poll_interval.as_duration().is_zero() {
            errors.push(ConfigError::InvalidConfig(
                "queue.poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.pipeline.chunk_size == 0 {
            errors.push(ConfigError::InvalidConfig(
                "pipeline.chunk_size must be greater than zero".to_string(),
            ));
        } else if self.pipeline.chunk_overlap >= self.pipeline.chunk_size {
            errors.push(ConfigError::InvalidConfig(format!(
                "pipeline.chunk_overlap ({}) must be smaller than pipeline.chunk_size ({})",
                self.pipeline.chunk_overlap, self.pipeline.chunk_size
            )));
        }

        if self.pipeline.embed_concurrency == 0 || self.pipeline.embedding.batch_size == 0 {
            errors.push(ConfigError::InvalidConfig(
                "pipeline.embed_concurrency and embedding.batch_size must be at least 1"
                    .to_string(),
            ));
        }

        if self.pipeline.embedding.dimensions == 0 {
            errors.push(ConfigError::InvalidConfig(
                "pipeline.embedding.dimensions must be greater than zero".to_string(),
            ));
        }

        if self.pipeline.embedding.provider == EmbeddingProvider::OpenAi
            && self.pipeline.embedding.api_key.is_none()
            && std::env::var("OPENAI_API_KEY").is_err()
        {
            errors.push(ConfigError::InvalidConfig(
                "open_ai embeddings need pipeline.embedding.api_key or OPENAI_API_KEY"
                    .to_string(),
            ));
        }

        if self.store.kind == StoreKind::Memory && self.store.path.is_some() {
            errors.push(ConfigError::InvalidConfig(
                "store.path is only meaningful for the sqlite store".to_string(),
            ));
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
