use crate::status::ChunkStatus;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// One file currently being downloaded. `name` is the business key;
/// at most one row exists per name at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingSet {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub date: DateTime<Utc>,
}

/// One byte-range segment of a working set. Identified by the
/// (working_set_id, start, end) triple; the boundary convention is
/// whatever the chunk planner uses, as long as it is consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub working_set_id: i64,
    pub start: u64,
    pub end: u64,
    pub status: ChunkStatus,
}

/// Append-only record of a finished download. Never updated or
/// deleted by this crate; repeated names are legal (re-downloads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedDownload {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}
