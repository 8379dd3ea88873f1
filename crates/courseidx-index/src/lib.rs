pub mod chunkers;
pub mod content_hash;
pub mod embedders;
mod error;
pub mod extractors;
pub mod layout;
pub mod maintenance;
pub mod orchestrator;
pub mod queue;
pub mod source;
pub mod store;
pub mod types;
pub mod watcher;

pub use chunkers::{create_chunker, Chunker, ChunkerConfig};
pub use content_hash::content_hash;
pub use embedders::{create_embedder, Embedder, EmbedderConfig, StubEmbedder};
pub use error::{IndexError, IndexingError, QueueError, WatchError};
pub use extractors::{create_extractors, ExtractorRegistry, TextExtractor};
pub use layout::{ContentFilter, ContentLayout, PathInfo};
pub use maintenance::{spawn_maintenance, Maintenance};
pub use orchestrator::{IndexingOrchestrator, OrchestratorSettings};
pub use queue::{
    JobHandler, JobQueue, ProgressReporter, QueueEvent, QueueSettings, QueuedJob, WorkerPool,
};
pub use source::FsContentSource;
pub use store::{open_store, MemoryVectorStore, SqliteVectorStore};
pub use types::*;
pub use watcher::{ChangeWatcher, WatchSettings, WatcherEvent};
