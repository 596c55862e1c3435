pub mod memory_store;
pub mod models;
pub mod sqlite_store;
pub mod store;

pub use memory_store::*;
pub use models::*;
pub use sqlite_store::*;
pub use store::TransferStore;
