use crate::TransferError;
use crate::config::StoreConfig;
use crate::store::{MemoryStore, SqliteStore, TransferStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PersistenceType {
    Memory,
    Sqlite(PathBuf),
}

/// Open the backend selected by `config`. The returned store is shared
/// by cloning the `Arc`; call `close()` on it when the process is done.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn TransferStore>, TransferError> {
    config.validate()?;
    let store: Arc<dyn TransferStore> = match &config.persistence_type {
        PersistenceType::Memory => Arc::new(MemoryStore::new()),
        PersistenceType::Sqlite(path) => {
            Arc::new(SqliteStore::open_with_limit(path, config.max_connections).await?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfigBuilder;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_backend_opens_empty() {
        let config = StoreConfigBuilder::new()
            .persistence_type(PersistenceType::Memory)
            .build()
            .unwrap();
        let store = open_store(&config).await.unwrap();
        assert!(store.list_working_sets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sqlite_backend_opens_and_accepts_writes() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfigBuilder::new()
            .persistence_type(PersistenceType::Sqlite(dir.path().join("transfers.db")))
            .build()
            .unwrap();

        let store = open_store(&config).await.unwrap();
        store.add_working_set("a.bin", 1, Utc::now()).await.unwrap();
        assert!(store.exists("a.bin").await.unwrap());
        store.close().await;
    }
}
