pub mod config;
pub mod error;
pub mod persistence;
pub mod status;
pub mod store;
pub mod wrapper;

pub use config::{StoreConfig, StoreConfigBuilder, StoreConfigError};
pub use error::TransferError;
pub use persistence::{PersistenceType, open_store};
pub use status::ChunkStatus;
pub use store::{Chunk, CompletedDownload, MemoryStore, SqliteStore, TransferStore, WorkingSet};
pub use wrapper::{ChunkTransferExecutor, ExecuteError};
