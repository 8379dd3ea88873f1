use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use courseidx_core::{RecordFilter, StoreError, VectorRecord, VectorStore};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS vectors (
        id TEXT PRIMARY KEY,
        collection_id TEXT NOT NULL,
        group_id TEXT,
        item_id TEXT,
        file_path TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        total_chunks INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB NOT NULL,
        metadata TEXT NOT NULL,
        indexed_at INTEGER NOT NULL,
        version TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_vectors_file ON vectors(collection_id, file_path);
    CREATE INDEX IF NOT EXISTS idx_vectors_group ON vectors(collection_id, group_id);";

/// Vector records in a SQLite file. Embeddings are stored as little-endian f32 blobs.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable {
        store: "sqlite".to_string(),
        message: e.to_string(),
    }
}

fn write_err(e: rusqlite::Error) -> StoreError {
    StoreError::Write(e.to_string())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// WHERE clause and bound values for a filter.
fn filter_clause(filter: &RecordFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for (column, value) in [
        ("collection_id", &filter.collection_id),
        ("group_id", &filter.group_id),
        ("item_id", &filter.item_id),
        ("file_path", &filter.file_path),
    ] {
        if let Some(v) = value {
            values.push(v.clone());
            clauses.push(format!("{} = ?{}", column, values.len()));
        }
    }
    if clauses.is_empty() {
        ("1 = 1".to_string(), values)
    } else {
        (clauses.join(" AND "), values)
    }
}

fn insert_records(tx: &Transaction<'_>, records: &[VectorRecord]) -> Result<(), StoreError> {
    let mut stmt = tx
        .prepare_cached(
            "INSERT OR REPLACE INTO vectors
             (id, collection_id, group_id, item_id, file_path, chunk_index, total_chunks,
              content, embedding, metadata, indexed_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .map_err(write_err)?;
    for record in records {
        let metadata = serde_json::to_string(&record.metadata)?;
        stmt.execute(params![
            record.id,
            record.collection_id,
            record.group_id,
            record.item_id,
            record.file_path,
            record.chunk_index as i64,
            record.total_chunks as i64,
            record.content,
            encode_embedding(&record.embedding),
            metadata,
            record.indexed_at.timestamp_millis(),
            record.version,
        ])
        .map_err(write_err)?;
    }
    Ok(())
}

impl SqliteVectorStore {
    /// Open (or create) a store at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(unavailable)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(unavailable)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(SqliteVectorStore {
            conn: Mutex::new(conn),
        })
    }

    /// Matching records ordered by file path then chunk index.
    pub fn records(&self, filter: &RecordFilter) -> Result<Vec<VectorRecord>, StoreError> {
        let (clause, values) = filter_clause(filter);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, collection_id, group_id, item_id, file_path, chunk_index, total_chunks,
                        content, embedding, metadata, indexed_at, version
                 FROM vectors WHERE {} ORDER BY file_path, chunk_index",
                clause
            ))
            .map_err(write_err)?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let indexed_at: i64 = row.get(10)?;
                let record = VectorRecord {
                    id: row.get(0)?,
                    collection_id: row.get(1)?,
                    group_id: row.get(2)?,
                    item_id: row.get(3)?,
                    file_path: row.get(4)?,
                    chunk_index: row.get::<_, i64>(5)? as usize,
                    total_chunks: row.get::<_, i64>(6)? as usize,
                    content: row.get(7)?,
                    embedding: decode_embedding(&row.get::<_, Vec<u8>>(8)?),
                    metadata: HashMap::new(),
                    indexed_at: Utc
                        .timestamp_millis_opt(indexed_at)
                        .single()
                        .unwrap_or_else(Utc::now),
                    version: row.get(11)?,
                };
                Ok((record, row.get::<_, String>(9)?))
            })
            .map_err(write_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (mut record, metadata) = row.map_err(write_err)?;
            record.metadata = serde_json::from_str(&metadata)?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err)?;
        insert_records(&tx, &records)?;
        tx.commit().map_err(write_err)?;
        Ok(records.len())
    }

    async fn delete_by_filter(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        if filter.is_unbounded() {
            return Err(StoreError::Write(
                "refusing to delete with an empty filter".to_string(),
            ));
        }
        let (clause, values) = filter_clause(filter);
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                &format!("DELETE FROM vectors WHERE {}", clause),
                params_from_iter(values.iter()),
            )
            .map_err(write_err)?;
        debug!(removed, ?filter, "deleted vector records");
        Ok(removed)
    }

    async fn replace_file(
        &self,
        collection_id: &str,
        file_path: &str,
        records: Vec<VectorRecord>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err)?;
        let removed = tx
            .execute(
                "DELETE FROM vectors WHERE collection_id = ?1 AND file_path = ?2",
                params![collection_id, file_path],
            )
            .map_err(write_err)?;
        insert_records(&tx, &records)?;
        tx.commit().map_err(write_err)?;
        Ok(removed)
    }

    async fn count(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        let (clause, values) = filter_clause(filter);
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM vectors WHERE {}", clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(write_err)?;
        Ok(count as usize)
    }

    async fn file_paths(&self, collection_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT DISTINCT file_path FROM vectors WHERE collection_id = ?1 ORDER BY file_path",
            )
            .map_err(write_err)?;
        let paths = stmt
            .query_map(params![collection_id], |row| row.get::<_, String>(0))
            .map_err(write_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(write_err)?;
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::tests::record;

    #[tokio::test]
    async fn test_replace_file_is_atomic_swap() {
        let store = SqliteVectorStore::open_memory().unwrap();
        store
            .upsert_batch(vec![
                record("c", "c/module-1/lesson-1.md", 0),
                record("c", "c/module-1/lesson-1.md", 1),
            ])
            .await
            .unwrap();

        let mut fresh = record("c", "c/module-1/lesson-1.md", 0);
        fresh.version = "v2".to_string();
        let removed = store
            .replace_file("c", "c/module-1/lesson-1.md", vec![fresh])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        let records = store
            .records(&RecordFilter::collection("c").with_file("c/module-1/lesson-1.md"))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, "v2");
        assert_eq!(records[0].embedding, vec![0.5; 4]);
    }

    #[tokio::test]
    async fn test_filters() {
        let store = SqliteVectorStore::open_memory().unwrap();
        store
            .upsert_batch(vec![
                record("a", "a/module-1/lesson-1.md", 0),
                record("a", "a/module-2/lesson-1.md", 0),
                record("b", "b/module-1/lesson-1.md", 0),
            ])
            .await
            .unwrap();

        let group = RecordFilter::collection("a").with_group("module-1");
        assert_eq!(store.count(&group).await.unwrap(), 1);
        assert_eq!(store.count(&RecordFilter::default()).await.unwrap(), 3);

        assert_eq!(store.delete_by_filter(&group).await.unwrap(), 1);
        assert_eq!(store.delete_by_collection("a").await.unwrap(), 1);
        assert_eq!(store.delete_by_collection("a").await.unwrap(), 0);
        assert_eq!(store.count(&RecordFilter::default()).await.unwrap(), 1);
        assert!(store.delete_by_filter(&RecordFilter::default()).await.is_err());
        assert_eq!(store.file_paths("b").await.unwrap(), vec!["b/module-1/lesson-1.md"]);
    }

    #[tokio::test]
    async fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/vectors.db");
        {
            let store = SqliteVectorStore::open(&path).unwrap();
            store
                .upsert_batch(vec![record("c", "c/module-1/lesson-1.md", 0)])
                .await
                .unwrap();
        }
        let store = SqliteVectorStore::open(&path).unwrap();
        assert_eq!(store.count(&RecordFilter::collection("c")).await.unwrap(), 1);
    }
}
