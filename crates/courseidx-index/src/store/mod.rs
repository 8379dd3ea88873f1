mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use std::path::Path;
use std::sync::Arc;

use courseidx_config::{StoreConfig, StoreKind};
use courseidx_core::{StoreError, VectorStore};

/// Open the vector store described by the config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryVectorStore::new())),
        StoreKind::Sqlite => {
            let path = config.path.as_deref().ok_or_else(|| StoreError::Unavailable {
                store: "sqlite".to_string(),
                message: "store.path is not set".to_string(),
            })?;
            Ok(Arc::new(SqliteVectorStore::open(Path::new(path))?))
        }
    }
}
