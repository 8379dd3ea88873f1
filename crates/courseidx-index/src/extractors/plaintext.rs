use super::{extension_of, TextExtractor};
use crate::IndexingError;
use async_trait::async_trait;

/// Plain text extractor for UTF-8 prose and markup.
pub struct PlainTextExtractor {
    /// File extensions to support (empty = all text files).
    extensions: Vec<String>,
}

impl PlainTextExtractor {
    pub fn new() -> Self {
        PlainTextExtractor {
            extensions: [
                "md", "mdx", "markdown", "txt", "rst", "adoc", "html", "htm", "json", "yaml",
                "yml", "toml", "csv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    fn is_likely_binary(content: &[u8]) -> bool {
        // NUL bytes in the first 8KB
        let check_len = content.len().min(8192);
        content[..check_len].contains(&0)
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, content: &[u8], path: &str) -> Result<String, IndexingError> {
        if Self::is_likely_binary(content) {
            return Err(IndexingError::UnsupportedFileType(format!(
                "Binary file detected: {}",
                path
            )));
        }

        let text = match std::str::from_utf8(content) {
            Ok(text) => text.to_string(),
            Err(_) => String::from_utf8_lossy(content).into_owned(),
        };
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }

    fn supports(&self, path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }

        match extension_of(path) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "plaintext"
    }
}
