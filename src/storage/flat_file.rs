//! Append-only text ledger, one [`ImportedPost`] per line.
//!
//! Each append is a single `write` on a file opened with `O_APPEND` while an
//! exclusive advisory lock is held, so overlapping runs in separate
//! processes never interleave partial lines. Lookups scan the whole file.

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::types::{ImportedPost, LogError};
use super::LogStore;

#[derive(Debug, Clone)]
pub struct FlatFileLog {
    path: PathBuf,
}

impl FlatFileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole ledger as text; a missing file reads as empty.
    async fn read_all(&self) -> Result<String, LogError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(LogError::Io(e)),
        }
    }

    async fn any_record(&self, pred: impl Fn(&ImportedPost) -> bool) -> Result<bool, LogError> {
        let content = self.read_all().await?;
        Ok(content
            .lines()
            .filter_map(ImportedPost::parse_line)
            .any(|record| pred(&record)))
    }
}

fn append_locked(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    file.lock()?;
    let result = file.write_all(line.as_bytes()).and_then(|()| file.flush());
    file.unlock()?;
    result
}

#[async_trait]
impl LogStore for FlatFileLog {
    async fn exists(&self, remote_id: u64, source_url: &str) -> Result<bool, LogError> {
        self.any_record(|r| r.matches_remote(remote_id, source_url))
            .await
    }

    async fn exists_by_slug_base(&self, slug: &str, source_url: &str) -> Result<bool, LogError> {
        self.any_record(|r| r.matches_slug_base(slug, source_url))
            .await
    }

    async fn append(&self, record: &ImportedPost) -> Result<(), LogError> {
        let path = self.path.clone();
        let line = record.to_line();
        tokio::task::spawn_blocking(move || append_locked(&path, &line)).await??;
        tracing::debug!(
            remote_id = record.remote_id,
            post_id = record.local_post_id,
            source = %record.source_url,
            "Appended ledger line"
        );
        Ok(())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ImportedPost>, LogError> {
        let content = self.read_all().await?;
        let records: Vec<ImportedPost> = content.lines().filter_map(ImportedPost::parse_line).collect();
        Ok(records.into_iter().rev().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<usize, LogError> {
        let content = self.read_all().await?;
        Ok(content.lines().filter(|l| !l.trim().is_empty()).count())
    }

    async fn size_bytes(&self) -> Result<u64, LogError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(LogError::Io(e)),
        }
    }

    async fn clear(&self) -> Result<bool, LogError> {
        let had_content = self.size_bytes().await? > 0;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(LogError::Io(e)),
        }
        tracing::info!(path = %self.path.display(), "Ledger cleared");
        Ok(had_content)
    }
}
