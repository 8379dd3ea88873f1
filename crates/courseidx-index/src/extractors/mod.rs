mod lesson;
mod plaintext;

pub use lesson::LessonExtractor;
pub use plaintext::PlainTextExtractor;

use std::sync::Arc;

use crate::IndexingError;
use async_trait::async_trait;

/// Trait for extracting text from files.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from raw bytes.
    async fn extract(&self, content: &[u8], path: &str) -> Result<String, IndexingError>;

    /// Check if this extractor supports the given file.
    fn supports(&self, path: &str) -> bool;

    /// Get the extractor name.
    fn name(&self) -> &'static str;
}

/// Ordered set of extractors; the first one that supports a path wins.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        ExtractorRegistry::default()
    }

    pub fn with(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn for_path(&self, path: &str) -> Option<&Arc<dyn TextExtractor>> {
        self.extractors.iter().find(|e| e.supports(path))
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

/// Structured lessons for `structured_extensions`, plain text for everything else.
pub fn create_extractors(structured_extensions: &[String]) -> ExtractorRegistry {
    ExtractorRegistry::new()
        .with(Arc::new(LessonExtractor::new(structured_extensions.to_vec())))
        .with(Arc::new(PlainTextExtractor::new()))
}

pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        None
    } else {
        Some(ext)
    }
}
