use crate::TransferError;
use crate::status::ChunkStatus;
use crate::store::TransferStore;
use log::debug;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Error surface of [`ChunkTransferExecutor::execute`]. The caller's
/// transfer error is carried untouched so retry policy upstream can
/// inspect the real failure.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error(transparent)]
    Store(#[from] TransferError),
    #[error(transparent)]
    Transfer(E),
}

/// Brackets an arbitrary chunk-transfer operation with status
/// bookkeeping: Started before the call, Completed or Error after,
/// then a finalize attempt that retires the working set once its last
/// chunk lands.
pub struct ChunkTransferExecutor {
    store: Arc<dyn TransferStore>,
}

impl ChunkTransferExecutor {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// Run `transfer` for one chunk of the named working set. The
    /// working set must already be registered. The transfer's own
    /// error is returned verbatim after the chunk is marked Error.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        start: u64,
        end: u64,
        transfer: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let working_set = self.store.get_working_set(name).await?;

        self.store
            .set_chunk_status(&working_set, start, end, ChunkStatus::Started)
            .await?;

        match transfer().await {
            Ok(value) => {
                self.store
                    .set_chunk_status(&working_set, start, end, ChunkStatus::Completed)
                    .await?;

                match self.store.finalize(&working_set).await {
                    Ok(()) => {}
                    // Not the last chunk, or a racing worker got there
                    // first. Both are business as usual.
                    Err(TransferError::NotComplete(_)) | Err(TransferError::NotFound(_)) => {
                        debug!("'{}' not finalized after chunk {}..{}", name, start, end);
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(value)
            }
            Err(e) => {
                self.store
                    .set_chunk_status(&working_set, start, end, ChunkStatus::Error)
                    .await?;
                Err(ExecuteError::Transfer(e))
            }
        }
    }
}
