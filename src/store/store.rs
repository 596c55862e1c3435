use crate::error::TransferError;
use crate::status::ChunkStatus;
use crate::store::models::{Chunk, CompletedDownload, WorkingSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable bookkeeping for chunked transfers: working sets, their
/// chunks, and the append-only completion history. Implementations
/// must guarantee at-most-once finalization under concurrent callers.
#[async_trait]
pub trait TransferStore: Send + Sync {
    // ---------------- WorkingSet ----------------
    async fn add_working_set(
        &self,
        name: &str,
        size: u64,
        date: DateTime<Utc>,
    ) -> Result<WorkingSet, TransferError>;
    async fn get_working_set(&self, name: &str) -> Result<WorkingSet, TransferError>;
    async fn exists(&self, name: &str) -> Result<bool, TransferError>;
    async fn remove_working_set(&self, name: &str) -> Result<u64, TransferError>;
    async fn list_working_sets(&self) -> Result<Vec<WorkingSet>, TransferError>;
    async fn clear_working_sets(&self) -> Result<u64, TransferError>;

    // ---------------- Chunk ----------------
    async fn add_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError>;
    async fn get_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError>;
    async fn get_chunk_by_id(&self, id: i64) -> Result<Chunk, TransferError>;
    async fn remove_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<u64, TransferError>;
    /// Pure status update; setting the current status again is a no-op
    /// that still reports the row as affected.
    async fn set_chunk_status(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
        status: ChunkStatus,
    ) -> Result<u64, TransferError>;
    async fn list_chunks(&self) -> Result<Vec<Chunk>, TransferError>;
    async fn clear_chunks(&self) -> Result<u64, TransferError>;

    // ---------------- History ----------------
    async fn record_completion(
        &self,
        name: &str,
        size: u64,
    ) -> Result<CompletedDownload, TransferError>;
    async fn list_history(&self) -> Result<Vec<CompletedDownload>, TransferError>;
    async fn clear_history(&self) -> Result<u64, TransferError>;

    // ---------------- Completion ----------------
    /// True iff no chunk of this working set has a status other than
    /// `Completed`. A working set with zero chunks counts as complete.
    async fn is_complete(&self, working_set: &WorkingSet) -> Result<bool, TransferError>;
    /// Retire a fully-downloaded working set: record it in the history,
    /// delete its chunks, delete the row itself, atomically. Fails with
    /// `NotComplete` while chunks remain unfinished, and with `NotFound`
    /// when a racing caller finalized the set first.
    async fn finalize(&self, working_set: &WorkingSet) -> Result<(), TransferError>;
    /// True when no working set exists for `name` (nothing in progress),
    /// otherwise delegates to `is_complete`.
    async fn is_download_finished(&self, name: &str) -> Result<bool, TransferError>;
    /// True when a working set exists for `name` and its chunks are past
    /// the untouched state per `transfer_started`.
    async fn is_download_started(&self, name: &str) -> Result<bool, TransferError>;

    /// Release backend resources. Further calls on the store are
    /// backend-defined errors.
    async fn close(&self);
}

/// The "has this download actually begun" predicate, kept verbatim
/// from the original system: not all chunks still Unknown, not all
/// Error, not all Completed, and none currently Started.
//
// TODO: the "none Started" leg reads backwards; confirm the intended
// product behavior before tightening it.
pub(crate) fn transfer_started(statuses: &[ChunkStatus]) -> bool {
    if statuses.is_empty() {
        return false;
    }
    let all_unknown = statuses.iter().all(|s| *s == ChunkStatus::Unknown);
    let all_error = statuses.iter().all(|s| *s == ChunkStatus::Error);
    let all_completed = statuses.iter().all(|s| *s == ChunkStatus::Completed);
    let any_started = statuses.iter().any(|s| *s == ChunkStatus::Started);

    !all_unknown && !all_error && !all_completed && !any_started
}
