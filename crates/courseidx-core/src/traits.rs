use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{SourceError, StoreError};
use crate::model::{RecordFilter, VectorRecord};

/// Metadata about a file or directory in the content tree.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Path relative to the content root, `/` separated.
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl Entry {
    /// Create a new file entry.
    pub fn file(path: String, name: String, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Entry {
            path,
            name,
            is_dir: false,
            size: Some(size),
            modified,
        }
    }

    /// Create a new directory entry.
    pub fn dir(path: String, name: String, modified: Option<DateTime<Utc>>) -> Self {
        Entry {
            path,
            name,
            is_dir: true,
            size: None,
            modified,
        }
    }
}

/// Read access to the course content tree.
///
/// All paths are relative to the content root. The empty string names the root.
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    /// List entries in a directory.
    async fn list(&self, dir: &str) -> Result<Vec<Entry>, SourceError>;

    /// Get metadata for a path.
    async fn stat(&self, path: &str) -> Result<Entry, SourceError>;

    /// Read the contents of a file.
    async fn read(&self, path: &str) -> Result<Vec<u8>, SourceError>;

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> Result<bool, SourceError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Persistent home of embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync + 'static {
    /// Insert or overwrite records by id. Returns the number written.
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError>;

    /// Delete every record the filter matches. Returns the number removed.
    async fn delete_by_filter(&self, filter: &RecordFilter) -> Result<usize, StoreError>;

    /// Delete every record of a collection.
    async fn delete_by_collection(&self, collection_id: &str) -> Result<usize, StoreError> {
        self.delete_by_filter(&RecordFilter::collection(collection_id))
            .await
    }

    /// Replace all records of one file with `records` as a single write.
    /// Returns the number of previous records removed.
    async fn replace_file(
        &self,
        collection_id: &str,
        file_path: &str,
        records: Vec<VectorRecord>,
    ) -> Result<usize, StoreError>;

    /// Count records the filter matches.
    async fn count(&self, filter: &RecordFilter) -> Result<usize, StoreError>;

    /// Distinct file paths with records in a collection, sorted.
    async fn file_paths(&self, collection_id: &str) -> Result<Vec<String>, StoreError>;
}
