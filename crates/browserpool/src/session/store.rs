//! Session record persistence.
//!
//! The controller talks to one [`SessionStore`], selected at startup and
//! injected; backends are substitutable without controller changes. Two
//! variants ship: a relational SQLite store and a document store keeping one
//! JSON file per session.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use log::warn;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use super::models::SessionRecord;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the persistence collaborator. Surfaced to callers as
/// retryable failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid session id: {0}")]
    InvalidId(String),
}

/// Durable record of session metadata.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a record, replacing any stale record left under the same id.
    /// The controller guarantees the id is not live; a leftover record (for
    /// example after cleanup) must not block a new session.
    async fn create(&self, record: &SessionRecord) -> StoreResult<()>;

    /// Fetch one record; `uptime_seconds` is derived at read time.
    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// List all records, newest first.
    async fn list_all(&self) -> StoreResult<Vec<SessionRecord>>;

    /// Delete one record; false when it did not exist.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Set the video preview link on an existing record.
    async fn update_preview_link(&self, id: &str, url: &str) -> StoreResult<()>;
}

/// All record columns for SELECT queries.
const RECORD_COLUMNS: &str = "id, port, endpoint, created_at, status, video_preview_link";

/// Relational store backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, record: &SessionRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, port, endpoint, created_at, status, video_preview_link)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                port = excluded.port,
                endpoint = excluded.endpoint,
                created_at = excluded.created_at,
                status = excluded.status,
                video_preview_link = excluded.video_preview_link
            "#,
        )
        .bind(&record.id)
        .bind(record.port)
        .bind(&record.endpoint)
        .bind(&record.created_at)
        .bind(record.status.to_string())
        .bind(&record.video_preview_link)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM sessions WHERE id = ?");
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(|mut record| {
            record.refresh_uptime();
            record
        }))
    }

    async fn list_all(&self) -> StoreResult<Vec<SessionRecord>> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM sessions ORDER BY created_at DESC");
        let mut records = sqlx::query_as::<_, SessionRecord>(&query)
            .fetch_all(&self.pool)
            .await?;

        for record in &mut records {
            record.refresh_uptime();
        }
        Ok(records)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_preview_link(&self, id: &str, url: &str) -> StoreResult<()> {
        sqlx::query("UPDATE sessions SET video_preview_link = ? WHERE id = ?")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Document store keeping one JSON file per session under a directory.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    /// Create the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn document_path(&self, id: &str) -> StoreResult<PathBuf> {
        // Ids become file names; refuse anything that could escape the dir.
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read_document(&self, path: &Path) -> StoreResult<Option<SessionRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let mut record: SessionRecord = serde_json::from_slice(&bytes)?;
                record.refresh_uptime();
                Ok(Some(record))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn create(&self, record: &SessionRecord) -> StoreResult<()> {
        let path = self.document_path(&record.id)?;
        let bytes = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let path = self.document_path(id)?;
        self.read_document(&path).await
    }

    async fn list_all(&self) -> StoreResult<Vec<SessionRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_document(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!("skipping unreadable session document {}: {err}", path.display()),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let path = self.document_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_preview_link(&self, id: &str, url: &str) -> StoreResult<()> {
        let path = self.document_path(id)?;
        if let Some(mut record) = self.read_document(&path).await? {
            record.video_preview_link = Some(url.to_string());
            let bytes = serde_json::to_vec_pretty(&record)?;
            tokio::fs::write(&path, bytes).await?;
        }
        Ok(())
    }
}
