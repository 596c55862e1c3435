use crate::TransferError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a single chunk. Stored in the database by its
/// string form, so `Display`/`FromStr` must round-trip exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Unknown,
    Started,
    Completed,
    Error,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Unknown => "UNKNOWN",
            ChunkStatus::Started => "STARTED",
            ChunkStatus::Completed => "COMPLETED",
            ChunkStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNKNOWN" => Ok(ChunkStatus::Unknown),
            "STARTED" => Ok(ChunkStatus::Started),
            "COMPLETED" => Ok(ChunkStatus::Completed),
            "ERROR" => Ok(ChunkStatus::Error),
            _ => Err(TransferError::Parse(format!("unknown chunk status: {s}"))),
        }
    }
}
