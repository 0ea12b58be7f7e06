//! The import ledger: durable record of every imported post, doubling as
//! the dedup index.
//!
//! Two interchangeable backends sit behind [`LogStore`]:
//!
//! - [`FlatFileLog`] - append-only text file (default)
//! - [`SqliteLog`] - keyed SQLite table with indexed lookups

mod flat_file;
mod sqlite;
mod types;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use flat_file::FlatFileLog;
pub use sqlite::SqliteLog;
pub use types::{slug_base, ImportedPost, LogError, TIMESTAMP_FORMAT};

use crate::config::{LedgerBackend, LedgerConfig};

/// Append-only import ledger.
///
/// Records are never updated or removed individually; only [`LogStore::clear`]
/// drops them, all at once. `append` must tolerate concurrent callers.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Whether `remote_id` from `source_url` was already imported.
    async fn exists(&self, remote_id: u64, source_url: &str) -> Result<bool, LogError>;

    /// Whether a post from `source_url` with the same slug base was already
    /// imported (`foo-2` matches a logged `foo`).
    async fn exists_by_slug_base(&self, slug: &str, source_url: &str) -> Result<bool, LogError>;

    async fn append(&self, record: &ImportedPost) -> Result<(), LogError>;

    /// Newest-first page of records.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImportedPost>, LogError>;

    async fn count(&self) -> Result<usize, LogError>;

    /// Storage footprint in bytes.
    async fn size_bytes(&self) -> Result<u64, LogError>;

    /// Drops the whole ledger. Returns whether anything was deleted.
    async fn clear(&self) -> Result<bool, LogError>;
}

/// Opens the configured ledger backend.
///
/// `base_dir` anchors the default location when no path is configured.
pub async fn open_ledger(config: &LedgerConfig, base_dir: &Path) -> Result<Arc<dyn LogStore>, LogError> {
    let path = config.resolve_path(base_dir);
    tracing::debug!(backend = ?config.backend, path = %path.display(), "Opening ledger");
    match config.backend {
        LedgerBackend::File => Ok(Arc::new(FlatFileLog::new(path))),
        LedgerBackend::Sqlite => {
            let path = path.to_string_lossy();
            Ok(Arc::new(SqliteLog::open(&path).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_open_ledger_picks_backend() {
        let dir = std::env::temp_dir().join("autosync_open_ledger_test");
        let _ = std::fs::remove_dir_all(&dir);

        let file = open_ledger(&LedgerConfig::default(), &dir).await.unwrap();
        file.append(&ImportedPost::now(1, 2, "s", "https://s", "t")).await.unwrap();
        assert!(dir.join("imported-urls.txt").exists());

        let sqlite = open_ledger(
            &LedgerConfig {
                backend: LedgerBackend::Sqlite,
                path: Some(PathBuf::from(":memory:")),
            },
            &dir,
        )
        .await
        .unwrap();
        assert_eq!(sqlite.count().await.unwrap(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
