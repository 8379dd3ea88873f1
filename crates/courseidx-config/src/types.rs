use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chunking strategy for text splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Fixed-size chunks on character boundaries
    Fixed,
    /// Paragraph, then sentence, then word boundaries
    #[default]
    Recursive,
}

/// Embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Deterministic hash-based vectors, no network
    #[default]
    Stub,
    /// Local Ollama
    Ollama,
    /// OpenAI-compatible API
    OpenAi,
}

/// Where vector records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// In-process only, lost on exit
    Memory,
    /// SQLite file
    #[default]
    Sqlite,
}

/// Human-readable duration (e.g., "200ms", "3s", "1h").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(std::time::Duration::from_secs(secs))
    }

    pub fn from_millis(millis: u64) -> Self {
        HumanDuration(std::time::Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else if let Some(n) = s.strip_suffix('d') {
            (n, "d")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            "h" => std::time::Duration::from_secs(num * 3600),
            "d" => std::time::Duration::from_secs(num * 86400),
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 || millis == 0 {
            write!(f, "{}ms", millis)
        } else if secs % 60 != 0 {
            write!(f, "{}s", secs)
        } else if secs % 3600 != 0 {
            write!(f, "{}m", secs / 60)
        } else if secs % 86400 != 0 {
            write!(f, "{}h", secs / 3600)
        } else {
            write!(f, "{}d", secs / 86400)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourseIdxConfig {
    /// Optional deployment name, only used in logs
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub store: StoreConfig,
}

/// The content tree being indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "default_content_root")]
    pub root: String,
    /// Recognized file extensions, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Maximum number of path segments below the root
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Glob patterns for paths that are never indexed
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_content_root() -> String {
    "./content".to_string()
}

fn default_extensions() -> Vec<String> {
    ["md", "mdx", "txt", "json", "yaml", "yml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_depth() -> usize {
    5
}

fn default_ignore() -> Vec<String> {
    [
        "**/.git/**",
        "**/node_modules/**",
        "**/*.test.*",
        "**/*.spec.*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            root: default_content_root(),
            extensions: default_extensions(),
            max_depth: default_max_depth(),
            ignore: default_ignore(),
        }
    }
}

/// Regexes that map path segments to collection/group/item identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_group_pattern")]
    pub group_pattern: String,
    #[serde(default = "default_item_pattern")]
    pub item_pattern: String,
    #[serde(default = "default_index_pattern")]
    pub index_pattern: String,
    /// Extensions parsed as structured lessons rather than plain text
    #[serde(default = "default_structured_extensions")]
    pub structured_extensions: Vec<String>,
}

fn default_group_pattern() -> String {
    r"^(module|group|unit|section)-[A-Za-z0-9_-]+$".to_string()
}

fn default_item_pattern() -> String {
    r"^(lesson|item)-[A-Za-z0-9_-]+\.[A-Za-z0-9]+$".to_string()
}

fn default_index_pattern() -> String {
    r"^(index|course)\.[A-Za-z0-9]+$".to_string()
}

fn default_structured_extensions() -> Vec<String> {
    vec!["json".to_string(), "yaml".to_string(), "yml".to_string()]
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            group_pattern: default_group_pattern(),
            item_pattern: default_item_pattern(),
            index_pattern: default_index_pattern(),
            structured_extensions: default_structured_extensions(),
        }
    }
}

/// Enqueue priority by kind of change. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_priority_collection_index")]
    pub collection_index: i64,
    #[serde(default = "default_priority_item")]
    pub item: i64,
    #[serde(default = "default_priority_other")]
    pub other: i64,
    #[serde(default = "default_priority_manual")]
    pub manual: i64,
    /// Added to a job's priority when it is replayed from the dead-letter store
    #[serde(default = "default_priority_replay_boost")]
    pub replay_boost: i64,
}

fn default_priority_collection_index() -> i64 {
    10
}

fn default_priority_item() -> i64 {
    5
}

fn default_priority_other() -> i64 {
    1
}

fn default_priority_manual() -> i64 {
    20
}

fn default_priority_replay_boost() -> i64 {
    5
}

impl Default for PriorityConfig {
    fn default() -> Self {
        PriorityConfig {
            collection_index: default_priority_collection_index(),
            item: default_priority_item(),
            other: default_priority_other(),
            manual: default_priority_manual(),
            replay_boost: default_priority_replay_boost(),
        }
    }
}

/// Change watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_debounce")]
    pub debounce: HumanDuration,
    /// Use a polling watcher at this interval instead of native OS events
    #[serde(default)]
    pub poll_interval: Option<HumanDuration>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub priorities: PriorityConfig,
}

fn default_true() -> bool {
    true
}

fn default_debounce() -> HumanDuration {
    HumanDuration::from_secs(3)
}

fn default_event_buffer() -> usize {
    256
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            enabled: true,
            debounce: default_debounce(),
            poll_interval: None,
            event_buffer: default_event_buffer(),
            priorities: PriorityConfig::default(),
        }
    }
}

/// Job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite file; defaults to `<content.root>/.courseidx/queue.db`
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_change_delay")]
    pub change_delay: HumanDuration,
    #[serde(default = "default_collection_delay")]
    pub collection_delay: HumanDuration,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: HumanDuration,
    #[serde(default = "default_backoff_max")]
    pub backoff_max: HumanDuration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_collection_max_attempts")]
    pub collection_max_attempts: u32,
    #[serde(default = "default_dead_letter_cap")]
    pub dead_letter_cap: usize,
    #[serde(default = "default_progress_ttl")]
    pub progress_ttl: HumanDuration,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: HumanDuration,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: HumanDuration,
    /// Completed and failed jobs older than this are removed by maintenance
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_concurrency() -> usize {
    2
}

fn default_change_delay() -> HumanDuration {
    HumanDuration::from_secs(1)
}

fn default_collection_delay() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_backoff_base() -> HumanDuration {
    HumanDuration::from_secs(2)
}

fn default_backoff_max() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_collection_max_attempts() -> u32 {
    5
}

fn default_dead_letter_cap() -> usize {
    1000
}

fn default_progress_ttl() -> HumanDuration {
    HumanDuration::from_secs(3600)
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_millis(500)
}

fn default_maintenance_interval() -> HumanDuration {
    HumanDuration::from_secs(3600)
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            path: None,
            concurrency: default_concurrency(),
            change_delay: default_change_delay(),
            collection_delay: default_collection_delay(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            max_attempts: default_max_attempts(),
            collection_max_attempts: default_collection_max_attempts(),
            dead_letter_cap: default_dead_letter_cap(),
            progress_ttl: default_progress_ttl(),
            poll_interval: default_poll_interval(),
            maintenance_interval: default_maintenance_interval(),
            retention_hours: default_retention_hours(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Base URL for HTTP providers
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Chunks per embed call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: EmbeddingProvider::default(),
            model: None,
            dimensions: default_embedding_dimensions(),
            endpoint: None,
            api_key: None,
            batch_size: default_batch_size(),
        }
    }
}

/// Extraction, chunking and embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub chunker: ChunkStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Concurrent embed calls within one job
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_min_chunk_size() -> usize {
    50
}

fn default_embed_concurrency() -> usize {
    4
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            chunker: ChunkStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            embedding: EmbeddingConfig::default(),
            embed_concurrency: default_embed_concurrency(),
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// SQLite file; defaults to `<content.root>/.courseidx/vectors.db`
    #[serde(default)]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_human_duration_parse() {
        assert_eq!(
            "200ms".parse::<HumanDuration>().unwrap().0,
            Duration::from_millis(200)
        );
        assert_eq!(
            "3s".parse::<HumanDuration>().unwrap().0,
            Duration::from_secs(3)
        );
        assert_eq!(
            "10m".parse::<HumanDuration>().unwrap().0,
            Duration::from_secs(600)
        );
        assert_eq!(
            "1h".parse::<HumanDuration>().unwrap().0,
            Duration::from_secs(3600)
        );
        assert_eq!(
            "2d".parse::<HumanDuration>().unwrap().0,
            Duration::from_secs(172800)
        );
    }

    #[test]
    fn test_human_duration_invalid() {
        assert!("fast".parse::<HumanDuration>().is_err());
        assert!("10x".parse::<HumanDuration>().is_err());
        assert!("s".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_human_duration_display() {
        assert_eq!(HumanDuration::from_millis(1500).to_string(), "1500ms");
        assert_eq!(HumanDuration::from_secs(3).to_string(), "3s");
        assert_eq!(HumanDuration::from_secs(600).to_string(), "10m");
        assert_eq!(HumanDuration::from_secs(3600).to_string(), "1h");
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CourseIdxConfig::default();
        assert_eq!(config.watch.debounce.as_duration(), Duration::from_secs(3));
        assert_eq!(config.watch.priorities.collection_index, 10);
        assert_eq!(config.watch.priorities.item, 5);
        assert_eq!(config.watch.priorities.other, 1);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.collection_max_attempts, 5);
        assert_eq!(config.queue.dead_letter_cap, 1000);
        assert_eq!(
            config.queue.collection_delay.as_duration(),
            Duration::from_secs(10)
        );
        assert_eq!(config.pipeline.chunk_size, 1000);
        assert_eq!(config.pipeline.chunk_overlap, 200);
    }
}
