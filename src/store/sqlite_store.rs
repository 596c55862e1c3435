use crate::TransferError;
use crate::status::ChunkStatus;
use crate::store::models::{Chunk, CompletedDownload, WorkingSet};
use crate::store::store::{TransferStore, transfer_started};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, sqlite::SqliteRow};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    // Serializes finalize so two workers finishing their last chunk at
    // the same time cannot both retire the working set.
    finalize_lock: Mutex<()>,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> Result<Self, TransferError> {
        Self::open_with_limit(db_path, 4).await
    }

    pub async fn open_with_limit(
        db_path: &Path,
        max_connections: u32,
    ) -> Result<Self, TransferError> {
        let cwd = std::env::current_dir()?;
        let db_abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            cwd.join(db_path)
        };

        if let Some(parent) = db_abs.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    TransferError::Io(format!("failed to create directory {:?}: {}", parent, e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_abs)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| TransferError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS working_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                size INTEGER NOT NULL,
                date TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                working_set_id INTEGER NOT NULL
                    REFERENCES working_sets(id) ON DELETE CASCADE,
                start INTEGER NOT NULL,
                "end" INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'UNKNOWN',
                UNIQUE(working_set_id, start, "end")
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completed_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        info!("opened transfer store at {}", db_abs.display());

        Ok(Self {
            pool: Arc::new(pool),
            finalize_lock: Mutex::new(()),
        })
    }

    fn row_to_working_set(row: &SqliteRow) -> Result<WorkingSet, TransferError> {
        let date_raw: String = row.get("date");
        let date = DateTime::parse_from_rfc3339(&date_raw)
            .map_err(|e| TransferError::Parse(format!("bad working set date '{date_raw}': {e}")))?
            .with_timezone(&Utc);
        Ok(WorkingSet {
            id: row.get("id"),
            name: row.get("name"),
            size: row.get::<i64, _>("size") as u64,
            date,
        })
    }

    fn row_to_chunk(row: &SqliteRow) -> Result<Chunk, TransferError> {
        let status_raw: String = row.get("status");
        Ok(Chunk {
            id: row.get("id"),
            working_set_id: row.get("working_set_id"),
            start: row.get::<i64, _>("start") as u64,
            end: row.get::<i64, _>("end") as u64,
            status: ChunkStatus::from_str(&status_raw)?,
        })
    }

    fn row_to_completed(row: &SqliteRow) -> Result<CompletedDownload, TransferError> {
        let ts_raw: String = row.get("timestamp");
        let timestamp = DateTime::parse_from_rfc3339(&ts_raw)
            .map_err(|e| TransferError::Parse(format!("bad history timestamp '{ts_raw}': {e}")))?
            .with_timezone(&Utc);
        Ok(CompletedDownload {
            id: row.get("id"),
            name: row.get("name"),
            size: row.get::<i64, _>("size") as u64,
            timestamp,
        })
    }
}

#[async_trait]
impl TransferStore for SqliteStore {
    // ---------------- WorkingSet ----------------
    async fn add_working_set(
        &self,
        name: &str,
        size: u64,
        date: DateTime<Utc>,
    ) -> Result<WorkingSet, TransferError> {
        let result = sqlx::query("INSERT INTO working_sets (name, size, date) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(size as i64)
            .bind(date.to_rfc3339())
            .execute(&*self.pool)
            .await
            .map_err(|e| match TransferError::from(e) {
                TransferError::DuplicateKey(_) => {
                    TransferError::DuplicateKey(format!("working set '{name}' already exists"))
                }
                other => other,
            })?;

        debug!("registered working set '{}' ({} bytes)", name, size);

        Ok(WorkingSet {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            size,
            date,
        })
    }

    async fn get_working_set(&self, name: &str) -> Result<WorkingSet, TransferError> {
        let row = sqlx::query("SELECT * FROM working_sets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_working_set(&row),
            None => Err(TransferError::NotFound(format!("working set '{name}'"))),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, TransferError> {
        let row = sqlx::query("SELECT 1 FROM working_sets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn remove_working_set(&self, name: &str) -> Result<u64, TransferError> {
        // Chunks go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM working_sets WHERE name = ?1")
            .bind(name)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_working_sets(&self) -> Result<Vec<WorkingSet>, TransferError> {
        let rows = sqlx::query("SELECT * FROM working_sets")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::row_to_working_set).collect()
    }

    async fn clear_working_sets(&self) -> Result<u64, TransferError> {
        let result = sqlx::query("DELETE FROM working_sets")
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------------- Chunk ----------------
    async fn add_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError> {
        let result = sqlx::query(
            r#"INSERT INTO chunks (working_set_id, start, "end", status) VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(working_set.id)
        .bind(start as i64)
        .bind(end as i64)
        .bind(ChunkStatus::Unknown.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| match TransferError::from(e) {
            TransferError::DuplicateKey(_) => TransferError::DuplicateKey(format!(
                "chunk {}..{} of working set '{}' already exists",
                start, end, working_set.name
            )),
            other => other,
        })?;

        Ok(Chunk {
            id: result.last_insert_rowid(),
            working_set_id: working_set.id,
            start,
            end,
            status: ChunkStatus::Unknown,
        })
    }

    async fn get_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<Chunk, TransferError> {
        let row = sqlx::query(
            r#"SELECT * FROM chunks WHERE working_set_id = ?1 AND start = ?2 AND "end" = ?3"#,
        )
        .bind(working_set.id)
        .bind(start as i64)
        .bind(end as i64)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_chunk(&row),
            None => Err(TransferError::NotFound(format!(
                "chunk {}..{} of working set '{}'",
                start, end, working_set.name
            ))),
        }
    }

    async fn get_chunk_by_id(&self, id: i64) -> Result<Chunk, TransferError> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_chunk(&row),
            None => Err(TransferError::NotFound(format!("chunk #{id}"))),
        }
    }

    async fn remove_chunk(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
    ) -> Result<u64, TransferError> {
        let result = sqlx::query(
            r#"DELETE FROM chunks WHERE working_set_id = ?1 AND start = ?2 AND "end" = ?3"#,
        )
        .bind(working_set.id)
        .bind(start as i64)
        .bind(end as i64)
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_chunk_status(
        &self,
        working_set: &WorkingSet,
        start: u64,
        end: u64,
        status: ChunkStatus,
    ) -> Result<u64, TransferError> {
        let result = sqlx::query(
            r#"UPDATE chunks SET status = ?1
               WHERE working_set_id = ?2 AND start = ?3 AND "end" = ?4"#,
        )
        .bind(status.as_str())
        .bind(working_set.id)
        .bind(start as i64)
        .bind(end as i64)
        .execute(&*self.pool)
        .await?;

        debug!(
            "chunk {}..{} of '{}' -> {}",
            start, end, working_set.name, status
        );
        Ok(result.rows_affected())
    }

    async fn list_chunks(&self) -> Result<Vec<Chunk>, TransferError> {
        let rows = sqlx::query("SELECT * FROM chunks")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn clear_chunks(&self) -> Result<u64, TransferError> {
        let result = sqlx::query("DELETE FROM chunks")
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------------- History ----------------
    async fn record_completion(
        &self,
        name: &str,
        size: u64,
    ) -> Result<CompletedDownload, TransferError> {
        let timestamp = Utc::now();
        let result =
            sqlx::query("INSERT INTO completed_history (name, size, timestamp) VALUES (?1, ?2, ?3)")
                .bind(name)
                .bind(size as i64)
                .bind(timestamp.to_rfc3339())
                .execute(&*self.pool)
                .await?;

        Ok(CompletedDownload {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            size,
            timestamp,
        })
    }

    async fn list_history(&self) -> Result<Vec<CompletedDownload>, TransferError> {
        let rows = sqlx::query("SELECT * FROM completed_history")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(Self::row_to_completed).collect()
    }

    async fn clear_history(&self) -> Result<u64, TransferError> {
        let result = sqlx::query("DELETE FROM completed_history")
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------------- Completion ----------------
    async fn is_complete(&self, working_set: &WorkingSet) -> Result<bool, TransferError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS remaining FROM chunks WHERE working_set_id = ?1 AND status != ?2",
        )
        .bind(working_set.id)
        .bind(ChunkStatus::Completed.as_str())
        .fetch_one(&*self.pool)
        .await?;

        Ok(row.get::<i64, _>("remaining") == 0)
    }

    async fn finalize(&self, working_set: &WorkingSet) -> Result<(), TransferError> {
        let _guard = self.finalize_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let remaining = sqlx::query(
            "SELECT COUNT(*) AS remaining FROM chunks WHERE working_set_id = ?1 AND status != ?2",
        )
        .bind(working_set.id)
        .bind(ChunkStatus::Completed.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get::<i64, _>("remaining");

        if remaining > 0 {
            return Err(TransferError::NotComplete(working_set.name.clone()));
        }

        // The row delete is the gate: zero rows affected means another
        // caller retired this working set first.
        let deleted = sqlx::query("DELETE FROM working_sets WHERE id = ?1")
            .bind(working_set.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(TransferError::NotFound(format!(
                "working set '{}'",
                working_set.name
            )));
        }

        sqlx::query("DELETE FROM chunks WHERE working_set_id = ?1")
            .bind(working_set.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO completed_history (name, size, timestamp) VALUES (?1, ?2, ?3)")
            .bind(&working_set.name)
            .bind(working_set.size as i64)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            "working set '{}' finalized ({} bytes)",
            working_set.name, working_set.size
        );
        Ok(())
    }

    async fn is_download_finished(&self, name: &str) -> Result<bool, TransferError> {
        let row = sqlx::query("SELECT * FROM working_sets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            // Nothing in progress counts as finished.
            None => Ok(true),
            Some(row) => {
                let working_set = Self::row_to_working_set(&row)?;
                self.is_complete(&working_set).await
            }
        }
    }

    async fn is_download_started(&self, name: &str) -> Result<bool, TransferError> {
        let row = sqlx::query("SELECT id FROM working_sets WHERE name = ?1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let working_set_id: i64 = row.get("id");

        let rows = sqlx::query("SELECT status FROM chunks WHERE working_set_id = ?1")
            .bind(working_set_id)
            .fetch_all(&*self.pool)
            .await?;
        let statuses = rows
            .iter()
            .map(|r| ChunkStatus::from_str(&r.get::<String, _>("status")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfer_started(&statuses))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
