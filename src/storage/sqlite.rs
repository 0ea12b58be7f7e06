//! Keyed ledger backend on SQLite.
//!
//! Same contract as the flat file, with indexed lookups on
//! `(source_url, remote_id)` and `(source_url, slug_base)`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{slug_base, ImportedPost, LogError, TIMESTAMP_FORMAT};
use super::LogStore;

type LedgerRow = (String, i64, i64, String, String, String);

#[derive(Clone)]
pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    /// Opens (creating if needed) the ledger database and runs migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, LogError> {
        let in_memory = path == ":memory:";

        if !in_memory {
            let parent = std::path::Path::new(path).parent();
            if let Some(parent) = parent.filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                // Pre-create with owner-only permissions; SQLite reports any real failure.
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path);
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(LogError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // Each in-memory connection is its own database.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(LogError::from_sqlx)?;

        let log = Self { pool };
        log.migrate().await.map_err(|e| match LogError::from_sqlx(e) {
            LogError::Locked => LogError::Locked,
            other => LogError::Migration(other.to_string()),
        })?;
        Ok(log)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS imported_posts (
                id INTEGER PRIMARY KEY,
                imported_at TEXT NOT NULL,
                remote_id INTEGER NOT NULL,
                local_post_id INTEGER NOT NULL,
                slug TEXT NOT NULL,
                slug_base TEXT NOT NULL,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_imported_remote ON imported_posts(source_url, remote_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_imported_slug_base ON imported_posts(source_url, slug_base)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn row_to_record(row: LedgerRow) -> Option<ImportedPost> {
    let (imported_at, remote_id, local_post_id, slug, source_url, title) = row;
    Some(ImportedPost {
        timestamp: NaiveDateTime::parse_from_str(&imported_at, TIMESTAMP_FORMAT).ok()?,
        remote_id: u64::try_from(remote_id).ok()?,
        local_post_id: u64::try_from(local_post_id).ok()?,
        slug,
        source_url,
        title,
    })
}

#[async_trait]
impl LogStore for SqliteLog {
    async fn exists(&self, remote_id: u64, source_url: &str) -> Result<bool, LogError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM imported_posts WHERE source_url = ? AND remote_id = ? LIMIT 1",
        )
        .bind(source_url.trim())
        .bind(to_i64(remote_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(LogError::from_sqlx)?;
        Ok(found.is_some())
    }

    async fn exists_by_slug_base(&self, slug: &str, source_url: &str) -> Result<bool, LogError> {
        let base = slug_base(slug);
        if base.is_empty() {
            return Ok(false);
        }
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM imported_posts WHERE source_url = ? AND slug_base = ? LIMIT 1",
        )
        .bind(source_url.trim())
        .bind(base)
        .fetch_optional(&self.pool)
        .await
        .map_err(LogError::from_sqlx)?;
        Ok(found.is_some())
    }

    async fn append(&self, record: &ImportedPost) -> Result<(), LogError> {
        sqlx::query(
            r#"
            INSERT INTO imported_posts
                (imported_at, remote_id, local_post_id, slug, slug_base, source_url, title)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(record.timestamp.format(TIMESTAMP_FORMAT).to_string())
        .bind(to_i64(record.remote_id))
        .bind(to_i64(record.local_post_id))
        .bind(&record.slug)
        .bind(slug_base(&record.slug))
        .bind(&record.source_url)
        .bind(&record.title)
        .execute(&self.pool)
        .await
        .map_err(LogError::from_sqlx)?;
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImportedPost>, LogError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT imported_at, remote_id, local_post_id, slug, source_url, title
            FROM imported_posts
            ORDER BY id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(LogError::from_sqlx)?;
        Ok(rows.into_iter().filter_map(row_to_record).collect())
    }

    async fn count(&self) -> Result<usize, LogError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM imported_posts")
            .fetch_one(&self.pool)
            .await
            .map_err(LogError::from_sqlx)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn size_bytes(&self) -> Result<u64, LogError> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(LogError::from_sqlx)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(LogError::from_sqlx)?;
        Ok(u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0))
    }

    async fn clear(&self) -> Result<bool, LogError> {
        let result = sqlx::query("DELETE FROM imported_posts")
            .execute(&self.pool)
            .await
            .map_err(LogError::from_sqlx)?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, "Ledger cleared");
        }
        Ok(deleted > 0)
    }
}
