use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use courseidx_core::{RecordFilter, StoreError, VectorRecord, VectorStore};

/// In-memory vector store for tests and ephemeral runs.
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        MemoryVectorStore {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Matching records ordered by file path then chunk index.
    pub fn records(&self, filter: &RecordFilter) -> Vec<VectorRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<VectorRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        matched
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_batch(&self, batch: Vec<VectorRecord>) -> Result<usize, StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let count = batch.len();
        for record in batch {
            records.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn delete_by_filter(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        if filter.is_unbounded() {
            return Err(StoreError::Write(
                "refusing to delete with an empty filter".to_string(),
            ));
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| !filter.matches(r));
        Ok(before - records.len())
    }

    async fn replace_file(
        &self,
        collection_id: &str,
        file_path: &str,
        batch: Vec<VectorRecord>,
    ) -> Result<usize, StoreError> {
        let filter = RecordFilter::collection(collection_id).with_file(file_path);
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let before = records.len();
        records.retain(|_, r| !filter.matches(r));
        let removed = before - records.len();
        for record in batch {
            records.insert(record.id.clone(), record);
        }
        Ok(removed)
    }

    async fn count(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.values().filter(|r| filter.matches(r)).count())
    }

    async fn file_paths(&self, collection_id: &str) -> Result<Vec<String>, StoreError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let paths: BTreeSet<&str> = records
            .values()
            .filter(|r| r.collection_id == collection_id)
            .map(|r| r.file_path.as_str())
            .collect();
        Ok(paths.into_iter().map(str::to_string).collect())
    }
}
