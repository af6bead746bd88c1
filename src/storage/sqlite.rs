//! SQLite storage implementation

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use tracing::{debug, info};

use super::memory::DEFAULT_MAX_ATTEMPTS;
use super::traits::{AggregateRecord, AggregateStore, MergeMode, StoreError, StoreErrorKind};

/// How long a connection waits on a locked database before reporting busy
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite-based aggregate storage
///
/// Each row carries a version; merges read the row, compute the new list and
/// write it back only if the version is unchanged, retrying on conflict.
pub struct SqliteStore {
    pool: SqlitePool,
    max_attempts: u32,
}

impl SqliteStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}", db_path);
        let options = SqliteConnectOptions::from_str(&database_url)
            .context("Failed to parse database path")?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        };
        store.initialize().await?;

        Ok(store)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregates (
                identity_id TEXT PRIMARY KEY,
                images TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite aggregate table initialized");
        Ok(())
    }

    fn now_epoch() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    async fn load(&self, identity_id: &str) -> Result<Option<(Vec<String>, i64)>, StoreError> {
        let row = sqlx::query("SELECT images, version FROM aggregates WHERE identity_id = ?")
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(row) => {
                let images: String = row.get("images");
                let images: Vec<String> = serde_json::from_str(&images).map_err(|e| {
                    StoreError::new(
                        StoreErrorKind::Unknown,
                        format!("corrupt image list for {}: {}", identity_id, e),
                    )
                })?;
                Ok(Some((images, row.get("version"))))
            }
            None => Ok(None),
        }
    }

    /// Conditional write; returns false when another writer got there first.
    async fn write(
        &self,
        identity_id: &str,
        expected_version: Option<i64>,
        images: &[String],
    ) -> Result<bool, StoreError> {
        let encoded = serde_json::to_string(images)
            .map_err(|e| StoreError::new(StoreErrorKind::Unknown, e.to_string()))?;
        let now = Self::now_epoch();

        let result = match expected_version {
            None => sqlx::query(
                r#"
                INSERT INTO aggregates (identity_id, images, version, created_at, updated_at)
                VALUES (?, ?, 1, ?, ?)
                ON CONFLICT(identity_id) DO NOTHING
                "#,
            )
            .bind(identity_id)
            .bind(&encoded)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await,
            Some(version) => sqlx::query(
                r#"
                UPDATE aggregates
                SET images = ?, version = version + 1, updated_at = ?
                WHERE identity_id = ? AND version = ?
                "#,
            )
            .bind(&encoded)
            .bind(now)
            .bind(identity_id)
            .bind(version)
            .execute(&self.pool)
            .await,
        }
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn merge_with(
        &self,
        identity_id: &str,
        image_url: &str,
        mode: MergeMode,
    ) -> Result<AggregateRecord, StoreError> {
        for attempt in 1..=self.max_attempts {
            let loaded = self.load(identity_id).await?;
            let expected = loaded.as_ref().map(|(_, version)| *version);
            let current = loaded.map(|(images, _)| images).unwrap_or_default();

            let images = match mode.apply(&current, image_url) {
                Some(images) => images,
                None => return Ok(AggregateRecord::new(identity_id, current)),
            };

            match self.write(identity_id, expected, &images).await {
                Ok(true) => {
                    debug!("Merged {} into {}", image_url, identity_id);
                    return Ok(AggregateRecord::new(identity_id, images));
                }
                Ok(false) => debug!("Merge conflict on {} (attempt {})", identity_id, attempt),
                // Lock contention outlasting the busy timeout is retried like a lost race
                Err(e) if e.kind() == StoreErrorKind::Conflict => {
                    debug!("Database busy merging into {} (attempt {}): {}", identity_id, attempt, e)
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::new(
            StoreErrorKind::Conflict,
            format!(
                "gave up merging into {} after {} attempts",
                identity_id, self.max_attempts
            ),
        ))
    }

    /// Count stored identities
    pub async fn count_identities(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM aggregates")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }
}

/// Translate a driver error into a store error kind
fn store_error(err: sqlx::Error) -> StoreError {
    let kind = match &err {
        sqlx::Error::PoolTimedOut => StoreErrorKind::ThroughputExceeded,
        // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("5" | "6" | "517")) => {
            StoreErrorKind::Conflict
        }
        // SQLITE_TOOBIG
        sqlx::Error::Database(db) if db.code().as_deref() == Some("18") => {
            StoreErrorKind::ItemTooLarge
        }
        sqlx::Error::Database(_) | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            StoreErrorKind::ServiceInternal
        }
        _ => StoreErrorKind::Unknown,
    };
    StoreError::new(kind, err.to_string())
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn get(&self, identity_id: &str) -> Result<Option<AggregateRecord>, StoreError> {
        Ok(self
            .load(identity_id)
            .await?
            .map(|(images, _)| AggregateRecord::new(identity_id, images)))
    }

    async fn merge(&self, identity_id: &str, image_url: &str) -> Result<AggregateRecord, StoreError> {
        self.merge_with(identity_id, image_url, MergeMode::Append).await
    }

    async fn merge_unique(
        &self,
        identity_id: &str,
        image_url: &str,
    ) -> Result<AggregateRecord, StoreError> {
        self.merge_with(identity_id, image_url, MergeMode::Unique).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();

        // Create
        let record = store.merge("C1", "http://b.s3-r.amazonaws.com/k.jpg").await.unwrap();
        assert_eq!(record.image_urls, vec!["http://b.s3-r.amazonaws.com/k.jpg"]);

        // Append
        let record = store.merge("C1", "http://b.s3-r.amazonaws.com/m.jpg").await.unwrap();
        assert_eq!(record.image_urls.len(), 2);
        assert_eq!(record.image_urls[1], "http://b.s3-r.amazonaws.com/m.jpg");

        // Get
        let retrieved = store.get("C1").await.unwrap();
        assert_eq!(retrieved, Some(record));
        assert!(store.get("C2").await.unwrap().is_none());

        // Count
        assert_eq!(store.count_identities().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merge_unique() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();

        store.merge_unique("C1", "a").await.unwrap();
        let record = store.merge_unique("C1", "a").await.unwrap();
        assert_eq!(record.image_urls, vec!["a"]);

        // Plain merge does not deduplicate
        let record = store.merge("C1", "a").await.unwrap();
        assert_eq!(record.image_urls, vec!["a", "a"]);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
            store.merge("C1", "a").await.unwrap();
        }

        let store = SqliteStore::new(db_path.to_str().unwrap()).await.unwrap();
        let record = store.merge("C1", "b").await.unwrap();
        assert_eq!(record.image_urls, vec!["a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(db_path.to_str().unwrap()).await.unwrap());
        let n = 20;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.merge("C1", &format!("url-{i}")).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = store.get("C1").await.unwrap().unwrap();
        assert_eq!(record.image_urls.len(), n);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_merge_waits_out_held_lock() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(db_path.to_str().unwrap()).await.unwrap());
        store.merge("C1", "a").await.unwrap();

        let mut holder = store.pool.acquire().await.unwrap();
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut *holder).await.unwrap();

        let merging = {
            let store = store.clone();
            tokio::spawn(async move { store.merge("C1", "b").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!merging.is_finished());

        sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        drop(holder);

        let record = merging.await.unwrap().unwrap();
        assert_eq!(record.image_urls, vec!["a", "b"]);
    }
}
