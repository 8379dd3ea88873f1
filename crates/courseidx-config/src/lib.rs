mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::STATE_DIR;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CourseIdxConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: CourseIdxConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize to JSON, used by the CLI to print the effective config.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: intro-courses
content:
  root: ./courses
"#;

        let config = CourseIdxConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("intro-courses".to_string()));
        assert_eq!(config.content.root, "./courses");
        assert_eq!(config.queue.concurrency, 2);
        assert_eq!(config.watch.debounce.as_duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_empty_document() {
        let config = CourseIdxConfig::from_yaml("{}").unwrap();
        assert_eq!(config.content.root, "./content");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
content:
  root: /srv/courses
  extensions: [md, json]
  max_depth: 4
  ignore: ["**/drafts/**"]
layout:
  group_pattern: "^chapter-[0-9]+$"
watch:
  debounce: 500ms
  poll_interval: 2s
  priorities:
    collection_index: 50
    item: 20
    other: 2
queue:
  path: /var/lib/courseidx/queue.db
  concurrency: 8
  change_delay: 0ms
  collection_delay: 30s
  max_attempts: 4
  retention_hours: 48
pipeline:
  chunker: fixed
  chunk_size: 400
  chunk_overlap: 40
  embedding:
    provider: ollama
    dimensions: 768
store:
  kind: memory
"#;

        let config = CourseIdxConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.content.max_depth, 4);
        assert_eq!(config.content.ignore, vec!["**/drafts/**"]);
        assert_eq!(config.layout.group_pattern, "^chapter-[0-9]+$");
        assert_eq!(config.watch.debounce.as_duration(), Duration::from_millis(500));
        assert_eq!(
            config.watch.poll_interval.map(|d| d.as_duration()),
            Some(Duration::from_secs(2))
        );
        assert_eq!(config.watch.priorities.collection_index, 50);
        assert_eq!(config.watch.priorities.manual, 20);
        assert_eq!(config.queue.concurrency, 8);
        assert!(config.queue.change_delay.as_duration().is_zero());
        assert_eq!(config.pipeline.chunker, ChunkStrategy::Fixed);
        assert_eq!(config.pipeline.embedding.provider, EmbeddingProvider::Ollama);
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("COURSEIDX_TEST_CONTENT_ROOT", "/tmp/courses");

        let yaml = r#"
content:
  root: ${COURSEIDX_TEST_CONTENT_ROOT}
"#;

        let config = CourseIdxConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.content.root, "/tmp/courses");
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let yaml = r#"
watch:
  debounce: soon
"#;
        assert!(matches!(
            CourseIdxConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courseidx.yaml");
        std::fs::write(&path, "queue:\n  concurrency: 3\n").unwrap();

        let config = CourseIdxConfig::from_file(&path).unwrap();
        assert_eq!(config.queue.concurrency, 3);

        let missing = CourseIdxConfig::from_file(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_effective_serializes_to_json() {
        let config = CourseIdxConfig::default().effective();
        let json = config.to_json_pretty().unwrap();
        assert!(json.contains("\"debounce\": \"3s\""));
    }
}
