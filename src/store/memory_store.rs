use crate::TransferError;
use crate::status::ChunkStatus;
use crate::store::models::{Chunk, CompletedDownload, WorkingSet};
use crate::store::store::{TransferStore, transfer_started};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    working_sets: HashMap<i64, WorkingSet>,
    chunks: HashMap<i64, Chunk>,
    history: Vec<CompletedDownload>,
    next_working_set_id: i64,
    next_chunk_id: i64,
    next_history_id: i64,
}

/// In-memory backend. All three tables live behind one lock so that
/// finalize can check and retire a working set in a single critical
/// section.
#[derive(Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn working_set_by_name(&self, name: &str) -> Option<&WorkingSet> {
        self.working_sets.values().find(|w| w.name == name)
    }

    fn chunk_statuses(&self, working_set_id: i64) -> Vec<ChunkStatus> {
        self.chunks
            .values()
            .filter(|c| c.working_set_id == working_set_id)
            .map(|c| c.status)
            .collect()
    }

    fn incomplete_chunks(&self, working_set_id: i64) -> usize {
        self.chunks
            .values()
            .filter(|c| c.working_set_id == working_set_id && c.status != ChunkStatus::Completed)
            .count()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    // ---------------- WorkingSet ----------------
    async fn add_working_set(
        &self,
        name: &str,
        size: u64,
        date: DateTime<Utc>,
    ) -> Result<WorkingSet, TransferError> {
        let mut state = self.state.write().await;
        if state.working_set_by_name(name).is_some() {
            return Err(TransferError::DuplicateKey(format!(
                "working set '{name}' already exists"
            )));
        }

        state.next_working_set_id += 1;
        let working_set = WorkingSet {
            id: state.next_working_set_id,
            name: name.to_string(),
            size,
            date,
        };
        state.working_sets.insert(working_set.id, working_set.clone());
        Ok(working_set)
    }

    async fn get_working_set(&self, name: &str) -> Result<WorkingSet, TransferError> {
        self.state
            .read()
            .await
            .working_set_by_name(name)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("working set '{name}'")))
    }

    async fn exists(&self, name: &str) -> Result<bool, TransferError> {
        Ok(self.state.read().await.working_set_by_name(name).is_some())
    }

    async fn remove_working_set(&self, name: &str) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let Some(id) = state.working_set_by_name(name).map(|w| w.id) else {
            return Ok(0);
        };
        state.working_sets.remove(&id);
        state.chunks.retain(|_, c| c.working_set_id != id);
        Ok(1)
    }

    async fn list_working_sets(&self) -> Result<Vec<WorkingSet>, TransferError> {
        Ok(self.state.read().await.working_sets.values().cloned().collect())
    }

    async fn clear_working_sets(&self) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let removed = state.working_sets.len() as u64;
        state.working_sets.clear();
        state.chunks.clear();
        Ok(removed)
    }

    // ---------------- Chunk ----------------
    async fn add_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError> {
        let mut state = self.state.write().await;
        let duplicate = state.chunks.values().any(|c| {
            c.working_set_id == working_set.id && c.start == start && c.end == end
        });
        if duplicate {
            return Err(TransferError::DuplicateKey(format!(
                "chunk {}..{} of working set '{}' already exists",
                start, end, working_set.name
            )));
        }

        state.next_chunk_id += 1;
        let chunk = Chunk {
            id: state.next_chunk_id,
            working_set_id: working_set.id,
            start,
            end,
            status: ChunkStatus::Unknown,
        };
        state.chunks.insert(chunk.id, chunk.clone());
        Ok(chunk)
    }

    async fn get_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError> {
        self.state
            .read()
            .await
            .chunks
            .values()
            .find(|c| c.working_set_id == working_set.id && c.start == start && c.end == end)
            .cloned()
            .ok_or_else(|| {
                TransferError::NotFound(format!(
                    "chunk {}..{} of working set '{}'",
                    start, end, working_set.name
                ))
            })
    }

    async fn get_chunk_by_id(&self, id: i64) -> Result<Chunk, TransferError> {
        self.state
            .read()
            .await
            .chunks
            .get(&id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("chunk #{id}")))
    }

    async fn remove_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let Some(id) = state
            .chunks
            .values()
            .find(|c| c.working_set_id == working_set.id && c.start == start && c.end == end)
            .map(|c| c.id)
        else {
            return Ok(0);
        };
        state.chunks.remove(&id);
        Ok(1)
    }

    async fn set_chunk_status(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
        status: ChunkStatus,
    ) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let chunk = state
            .chunks
            .values_mut()
            .find(|c| c.working_set_id == working_set.id && c.start == start && c.end == end);
        match chunk {
            Some(chunk) => {
                chunk.status = status;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_chunks(&self) -> Result<Vec<Chunk>, TransferError> {
        Ok(self.state.read().await.chunks.values().cloned().collect())
    }

    async fn clear_chunks(&self) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let removed = state.chunks.len() as u64;
        state.chunks.clear();
        Ok(removed)
    }

    // ---------------- History ----------------
    async fn record_completion(
        &self,
        name: &str,
        size: u64,
    ) -> Result<CompletedDownload, TransferError> {
        let mut state = self.state.write().await;
        state.next_history_id += 1;
        let record = CompletedDownload {
            id: state.next_history_id,
            name: name.to_string(),
            size,
            timestamp: Utc::now(),
        };
        state.history.push(record.clone());
        Ok(record)
    }

    async fn list_history(&self) -> Result<Vec<CompletedDownload>, TransferError> {
        Ok(self.state.read().await.history.clone())
    }

    async fn clear_history(&self) -> Result<u64, TransferError> {
        let mut state = self.state.write().await;
        let removed = state.history.len() as u64;
        state.history.clear();
        Ok(removed)
    }

    // ---------------- Completion ----------------
    async fn is_complete(&self, working_set: &WorkingSet) -> Result<bool, TransferError> {
        Ok(self.state.read().await.incomplete_chunks(working_set.id) == 0)
    }

    async fn finalize(&self, working_set: &WorkingSet) -> Result<(), TransferError> {
        // One write guard covers check, delete and history append, so a
        // racing finalize either wins outright or sees the row gone.
        let mut state = self.state.write().await;

        if !state.working_sets.contains_key(&working_set.id) {
            return Err(TransferError::NotFound(format!(
                "working set '{}'",
                working_set.name
            )));
        }
        if state.incomplete_chunks(working_set.id) > 0 {
            return Err(TransferError::NotComplete(working_set.name.clone()));
        }

        state.working_sets.remove(&working_set.id);
        state.chunks.retain(|_, c| c.working_set_id != working_set.id);
        state.next_history_id += 1;
        let record = CompletedDownload {
            id: state.next_history_id,
            name: working_set.name.clone(),
            size: working_set.size,
            timestamp: Utc::now(),
        };
        state.history.push(record);

        info!(
            "working set '{}' finalized ({} bytes)",
            working_set.name, working_set.size
        );
        Ok(())
    }

    async fn is_download_finished(&self, name: &str) -> Result<bool, TransferError> {
        let state = self.state.read().await;
        match state.working_set_by_name(name) {
            None => Ok(true),
            Some(working_set) => Ok(state.incomplete_chunks(working_set.id) == 0),
        }
    }

    async fn is_download_started(&self, name: &str) -> Result<bool, TransferError> {
        let state = self.state.read().await;
        let Some(working_set) = state.working_set_by_name(name) else {
            return Ok(false);
        };
        Ok(transfer_started(&state.chunk_statuses(working_set.id)))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn populated_set(store: &MemoryStore, name: &str, ranges: &[(u64, u64)]) -> WorkingSet {
        let ws = store.add_working_set(name, 1000, Utc::now()).await.unwrap();
        for (start, end) in ranges {
            store.add_chunk(&ws, *start, *end).await.unwrap();
        }
        ws
    }

    #[tokio::test]
    async fn working_set_round_trip() {
        let store = MemoryStore::new();
        let date = Utc::now();
        let added = store.add_working_set("a.bin", 42, date).await.unwrap();
        let loaded = store.get_working_set("a.bin").await.unwrap();
        assert_eq!(loaded.id, added.id);
        assert_eq!(loaded.name, "a.bin");
        assert_eq!(loaded.size, 42);
        assert_eq!(loaded.date, date);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let store = MemoryStore::new();
        store.add_working_set("a.bin", 1, Utc::now()).await.unwrap();
        let err = store
            .add_working_set("a.bin", 2, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::DuplicateKey(_)));
        assert_eq!(store.list_working_sets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_lookups_fail_with_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_working_set("nope").await.unwrap_err(),
            TransferError::NotFound(_)
        ));
        assert!(matches!(
            store.get_chunk_by_id(7).await.unwrap_err(),
            TransferError::NotFound(_)
        ));
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn zero_chunk_working_set_is_vacuously_complete() {
        let store = MemoryStore::new();
        let ws = populated_set(&store, "a.bin", &[]).await;
        assert!(store.is_complete(&ws).await.unwrap());
    }

    #[tokio::test]
    async fn completion_flips_exactly_on_the_last_chunk() {
        for n in [1u64, 2, 5] {
            let store = MemoryStore::new();
            let ranges: Vec<(u64, u64)> = (0..n).map(|i| (i * 10, i * 10 + 9)).collect();
            let ws = populated_set(&store, "a.bin", &ranges).await;

            for (i, (start, end)) in ranges.iter().enumerate() {
                assert!(!store.is_complete(&ws).await.unwrap(), "n={n} i={i}");
                store
                    .set_chunk_status(&ws, *start, *end, ChunkStatus::Completed)
                    .await
                    .unwrap();
            }
            assert!(store.is_complete(&ws).await.unwrap(), "n={n}");
        }
    }

    #[tokio::test]
    async fn finalize_side_effects() {
        let store = MemoryStore::new();
        let ws = populated_set(&store, "a.bin", &[(0, 9), (10, 19)]).await;
        for (start, end) in [(0, 9), (10, 19)] {
            store
                .set_chunk_status(&ws, start, end, ChunkStatus::Completed)
                .await
                .unwrap();
        }

        store.finalize(&ws).await.unwrap();

        assert!(!store.exists("a.bin").await.unwrap());
        assert!(store.list_chunks().await.unwrap().is_empty());
        let history = store.list_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "a.bin");
        assert_eq!(history[0].size, 1000);
    }

    #[tokio::test]
    async fn finalize_on_incomplete_set_changes_nothing() {
        let store = MemoryStore::new();
        let ws = populated_set(&store, "a.bin", &[(0, 9)]).await;

        let err = store.finalize(&ws).await.unwrap_err();
        assert!(matches!(err, TransferError::NotComplete(_)));
        assert!(store.exists("a.bin").await.unwrap());
        assert_eq!(store.list_chunks().await.unwrap().len(), 1);
        assert!(store.list_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_completions_are_all_recorded() {
        let store = MemoryStore::new();
        store.record_completion("a.bin", 10).await.unwrap();
        store.record_completion("a.bin", 10).await.unwrap();
        assert_eq!(store.list_history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn download_finished_when_nothing_in_progress() {
        let store = MemoryStore::new();
        assert!(store.is_download_finished("a.bin").await.unwrap());

        let ws = populated_set(&store, "a.bin", &[(0, 9)]).await;
        assert!(!store.is_download_finished("a.bin").await.unwrap());

        store
            .set_chunk_status(&ws, 0, 9, ChunkStatus::Completed)
            .await
            .unwrap();
        assert!(store.is_download_finished("a.bin").await.unwrap());
    }

    #[tokio::test]
    async fn download_started_follows_the_compound_predicate() {
        let store = MemoryStore::new();
        assert!(!store.is_download_started("a.bin").await.unwrap());

        let ws = populated_set(&store, "a.bin", &[(0, 9), (10, 19)]).await;
        // All chunks untouched.
        assert!(!store.is_download_started("a.bin").await.unwrap());

        // One completed, one untouched: in progress.
        store
            .set_chunk_status(&ws, 0, 9, ChunkStatus::Completed)
            .await
            .unwrap();
        assert!(store.is_download_started("a.bin").await.unwrap());

        // An in-flight chunk turns the predicate off again.
        store
            .set_chunk_status(&ws, 10, 19, ChunkStatus::Started)
            .await
            .unwrap();
        assert!(!store.is_download_started("a.bin").await.unwrap());

        // Everything completed: no longer "started".
        store
            .set_chunk_status(&ws, 10, 19, ChunkStatus::Completed)
            .await
            .unwrap();
        assert!(!store.is_download_started("a.bin").await.unwrap());
    }

    #[tokio::test]
    async fn set_chunk_status_reports_affected_rows() {
        let store = MemoryStore::new();
        let ws = populated_set(&store, "a.bin", &[(0, 9)]).await;

        let affected = store
            .set_chunk_status(&ws, 0, 9, ChunkStatus::Started)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        // Idempotent re-set still reports success.
        let affected = store
            .set_chunk_status(&ws, 0, 9, ChunkStatus::Started)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        // Unregistered range touches nothing.
        let affected = store
            .set_chunk_status(&ws, 500, 599, ChunkStatus::Started)
            .await
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn concurrent_finalize_writes_exactly_one_history_row() {
        let store = Arc::new(MemoryStore::new());
        let ws = store.add_working_set("a.bin", 100, Utc::now()).await.unwrap();
        store.add_chunk(&ws, 0, 99).await.unwrap();
        store
            .set_chunk_status(&ws, 0, 99, ChunkStatus::Completed)
            .await
            .unwrap();

        let (s1, s2) = (Arc::clone(&store), Arc::clone(&store));
        let (w1, w2) = (ws.clone(), ws.clone());
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.finalize(&w1).await }),
            tokio::spawn(async move { s2.finalize(&w2).await }),
        );
        let results = [r1.unwrap(), r2.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(TransferError::NotFound(_)))));
        assert_eq!(store.list_history().await.unwrap().len(), 1);
    }
}
