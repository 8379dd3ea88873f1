use super::{extension_of, TextExtractor};
use crate::IndexingError;
use async_trait::async_trait;
use serde_json::Value;

/// Extracts indexable text from a structured lesson document (JSON or YAML).
///
/// Recognized fields: `title`, `description`, `content`, `examples`,
/// `key_points` (or `keyPoints`). `content` may be a string, a list of
/// strings, or a list of sections with `heading`/`body`.
pub struct LessonExtractor {
    extensions: Vec<String>,
}

impl LessonExtractor {
    pub fn new(extensions: Vec<String>) -> Self {
        LessonExtractor { extensions }
    }

    fn parse(content: &[u8], path: &str) -> Result<Value, IndexingError> {
        match extension_of(path).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("json") => Ok(serde_json::from_slice(content)?),
            _ => Ok(serde_yaml::from_slice(content)?),
        }
    }

    fn render(doc: &Value) -> Vec<String> {
        let mut sections = Vec::new();

        if let Some(title) = doc.get("title").and_then(Value::as_str) {
            sections.push(format!("# {}", title.trim()));
        }
        if let Some(description) = doc.get("description").and_then(Value::as_str) {
            sections.push(description.trim().to_string());
        }
        if let Some(content) = doc.get("content") {
            sections.extend(render_content(content));
        }
        if let Some(Value::Array(examples)) = doc.get("examples") {
            for example in examples {
                if let Some(text) = render_example(example) {
                    sections.push(text);
                }
            }
        }
        let key_points = doc.get("key_points").or_else(|| doc.get("keyPoints"));
        if let Some(Value::Array(points)) = key_points {
            let bullets: Vec<String> = points
                .iter()
                .filter_map(Value::as_str)
                .map(|p| format!("- {}", p.trim()))
                .collect();
            if !bullets.is_empty() {
                sections.push(format!("Key points:\n{}", bullets.join("\n")));
            }
        }

        sections.retain(|s| !s.trim().is_empty());
        sections
    }
}

fn render_content(content: &Value) -> Vec<String> {
    match content {
        Value::String(s) => vec![s.trim().to_string()],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(_) => {
                    let heading = part.get("heading").and_then(Value::as_str);
                    let body = part.get("body").and_then(Value::as_str);
                    match (heading, body) {
                        (Some(h), Some(b)) => Some(format!("## {}\n\n{}", h.trim(), b.trim())),
                        (None, Some(b)) => Some(b.trim().to_string()),
                        (Some(h), None) => Some(format!("## {}", h.trim())),
                        (None, None) => None,
                    }
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn render_example(example: &Value) -> Option<String> {
    match example {
        Value::String(s) => Some(format!("Example:\n{}", s.trim())),
        Value::Object(_) => {
            let mut parts = Vec::new();
            if let Some(title) = example.get("title").and_then(Value::as_str) {
                parts.push(format!("Example: {}", title.trim()));
            } else {
                parts.push("Example:".to_string());
            }
            if let Some(code) = example.get("code").and_then(Value::as_str) {
                parts.push(code.trim_end().to_string());
            }
            if let Some(explanation) = example.get("explanation").and_then(Value::as_str) {
                parts.push(explanation.trim().to_string());
            }
            (parts.len() > 1).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

#[async_trait]
impl TextExtractor for LessonExtractor {
    async fn extract(&self, content: &[u8], path: &str) -> Result<String, IndexingError> {
        let doc = Self::parse(content, path)?;
        if !doc.is_object() {
            return Err(IndexingError::ExtractionError(format!(
                "{} is not a lesson document",
                path
            )));
        }

        let sections = Self::render(&doc);
        if sections.is_empty() {
            return Err(IndexingError::ExtractionError(format!(
                "{} has no title, description, content, examples or key points",
                path
            )));
        }

        Ok(sections.join("\n\n"))
    }

    fn supports(&self, path: &str) -> bool {
        match extension_of(path) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "lesson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LessonExtractor {
        LessonExtractor::new(vec!["json".into(), "yaml".into(), "yml".into()])
    }

    #[tokio::test]
    async fn test_extract_json_lesson() {
        let doc = r#"{
            "title": "Borrowing",
            "description": "References without ownership.",
            "content": [
                {"heading": "Shared references", "body": "Many readers."},
                "Mutable references are exclusive."
            ],
            "examples": [{"title": "Borrow", "code": "let r = &x;"}],
            "keyPoints": ["One writer", "Or many readers"]
        }"#;

        let text = extractor()
            .extract(doc.as_bytes(), "c/module-1/lesson-2.json")
            .await
            .unwrap();

        assert!(text.starts_with("# Borrowing\n\nReferences without ownership."));
        assert!(text.contains("## Shared references\n\nMany readers."));
        assert!(text.contains("Mutable references are exclusive."));
        assert!(text.contains("Example: Borrow\nlet r = &x;"));
        assert!(text.contains("Key points:\n- One writer\n- Or many readers"));
    }

    #[tokio::test]
    async fn test_extract_yaml_lesson() {
        let doc = "title: Traits\ncontent: Shared behaviour.\nkey_points:\n  - impl blocks\n";
        let text = extractor()
            .extract(doc.as_bytes(), "c/module-2/lesson-1.yaml")
            .await
            .unwrap();
        assert_eq!(text, "# Traits\n\nShared behaviour.\n\nKey points:\n- impl blocks");
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let result = extractor()
            .extract(b"{\"title\": ", "c/module-1/lesson-1.json")
            .await;
        assert!(matches!(result, Err(IndexingError::JsonError(_))));
    }

    #[tokio::test]
    async fn test_document_without_lesson_fields() {
        let result = extractor()
            .extract(b"{\"unrelated\": 1}", "c/module-1/lesson-1.json")
            .await;
        assert!(matches!(result, Err(IndexingError::ExtractionError(_))));

        let scalar = extractor().extract(b"42", "c/module-1/lesson-1.yaml").await;
        assert!(matches!(scalar, Err(IndexingError::ExtractionError(_))));
    }

    #[test]
    fn test_supports() {
        assert!(extractor().supports("c/module-1/lesson-1.YML"));
        assert!(!extractor().supports("c/module-1/lesson-1.md"));
    }
}
