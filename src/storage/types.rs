use chrono::{NaiveDateTime, Timelike};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::util::single_line;

// ============================================================================
// Error Types
// ============================================================================

/// Ledger failures. Callers treat these as per-item problems, never as a
/// reason to abort a run.
#[derive(Debug, Error)]
pub enum LogError {
    /// Reading or writing the ledger file failed
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The SQLite ledger is held by another process
    #[error("Ledger database is locked by another process")]
    Locked,

    /// Schema setup failed
    #[error("Ledger migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A blocking ledger task panicked or was cancelled
    #[error("Ledger task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl LogError {
    /// Maps lock-related sqlx errors to [`LogError::Locked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return LogError::Locked;
        }
        LogError::Database(err)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Timestamp layout used in ledger lines and the SQLite `imported_at` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One successful import. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPost {
    /// Local wall-clock time of the import, second precision.
    pub timestamp: NaiveDateTime,
    pub remote_id: u64,
    pub local_post_id: u64,
    pub slug: String,
    pub source_url: String,
    pub title: String,
}

impl ImportedPost {
    /// Builds a record in its stored form: text fields collapsed onto one
    /// trimmed line, sub-second precision dropped.
    pub fn new(
        timestamp: NaiveDateTime,
        remote_id: u64,
        local_post_id: u64,
        slug: &str,
        source_url: &str,
        title: &str,
    ) -> Self {
        Self {
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            remote_id,
            local_post_id,
            slug: single_line(slug).into_owned(),
            source_url: single_line(source_url).into_owned(),
            title: single_line(title).into_owned(),
        }
    }

    /// A record stamped with the current local time.
    pub fn now(remote_id: u64, local_post_id: u64, slug: &str, source_url: &str, title: &str) -> Self {
        Self::new(
            chrono::Local::now().naive_local(),
            remote_id,
            local_post_id,
            slug,
            source_url,
            title,
        )
    }

    /// Ledger line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] RemoteID:{} | PostID:{} | Slug:{} | Source:{} | Title:{}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.remote_id,
            self.local_post_id,
            single_line(&self.slug),
            single_line(&self.source_url),
            single_line(&self.title),
        )
    }

    /// Parses one ledger line. `None` for anything that does not match the
    /// layout written by [`ImportedPost::to_line`].
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = LINE_RE.captures(line.trim_end_matches(['\r', '\n']))?;
        let timestamp =
            NaiveDateTime::parse_from_str(caps[1].trim(), TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            timestamp,
            remote_id: caps[2].parse().ok()?,
            local_post_id: caps[3].parse().ok()?,
            slug: caps[4].trim().to_string(),
            source_url: caps[5].trim().to_string(),
            title: caps[6].trim().to_string(),
        })
    }

    /// True when this record was imported from `source_url` under `remote_id`.
    pub fn matches_remote(&self, remote_id: u64, source_url: &str) -> bool {
        self.remote_id == remote_id && self.source_url == source_url.trim()
    }

    /// True when this record's slug shares a base with `slug` on the same source.
    pub fn matches_slug_base(&self, slug: &str, source_url: &str) -> bool {
        let wanted = slug_base(slug);
        !wanted.is_empty() && self.source_url == source_url.trim() && slug_base(&self.slug) == wanted
    }
}

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(.*?)\]\s+RemoteID:(\d+)\s+\|\s+PostID:(\d+)\s+\|\s+Slug:(.*?)\s+\|\s+Source:(.*?)\s+\|\s+Title:(.*)$",
    )
    .unwrap()
});
static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-\d+$").unwrap());

/// Strips a trailing `-<digits>` disambiguation suffix, so `foo-2` and
/// `foo` share the base `foo`.
pub fn slug_base(slug: &str) -> &str {
    let slug = slug.trim();
    match SUFFIX_RE.find(slug) {
        Some(m) => &slug[..m.start()],
        None => slug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_line_layout() {
        let record = ImportedPost::new(ts(), 42, 1001, "hello-world", "https://a.example/wp-json", "Hello World");
        assert_eq!(
            record.to_line(),
            "[2024-03-09 14:05:07] RemoteID:42 | PostID:1001 | Slug:hello-world | Source:https://a.example/wp-json | Title:Hello World\n"
        );
    }

    #[test]
    fn test_parse_line_round_trip() {
        let record = ImportedPost::new(ts(), 7, 8, "a-b", "https://s.example", "Pipes | in | title");
        assert_eq!(ImportedPost::parse_line(&record.to_line()), Some(record));
    }

    #[test]
    fn test_new_flattens_multiline_fields() {
        let record = ImportedPost::new(ts(), 1, 2, "s", "u", "Line one\nLine two\r\n");
        assert_eq!(record.title, "Line one Line two");
        assert_eq!(record.to_line().matches('\n').count(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ImportedPost::parse_line(""), None);
        assert_eq!(ImportedPost::parse_line("random text"), None);
        assert_eq!(
            ImportedPost::parse_line("[not a date] RemoteID:1 | PostID:2 | Slug:s | Source:u | Title:t"),
            None
        );
        assert_eq!(
            ImportedPost::parse_line("[2024-03-09 14:05:07] RemoteID:x | PostID:2 | Slug:s | Source:u | Title:t"),
            None
        );
    }

    #[test]
    fn test_parse_tolerates_loose_spacing() {
        let parsed = ImportedPost::parse_line(
            "[2024-03-09 14:05:07]  RemoteID:5  |  PostID:6 |  Slug: spaced  | Source: https://x |Title:  T ",
        );
        // "|Title" lacks the whitespace the layout requires.
        assert_eq!(parsed, None);

        let parsed = ImportedPost::parse_line(
            "[2024-03-09 14:05:07]  RemoteID:5  |  PostID:6 |  Slug: spaced  | Source: https://x | Title:  T ",
        )
        .unwrap();
        assert_eq!(parsed.slug, "spaced");
        assert_eq!(parsed.source_url, "https://x");
        assert_eq!(parsed.title, "T");
    }

    #[test]
    fn test_slug_base() {
        assert_eq!(slug_base("foo-2"), "foo");
        assert_eq!(slug_base("foo"), "foo");
        assert_eq!(slug_base("foo-bar-10"), "foo-bar");
        assert_eq!(slug_base("2024-recap"), "2024-recap");
        assert_eq!(slug_base("foo-2-3"), "foo-2");
        assert_eq!(slug_base("-5"), "");
    }

    #[test]
    fn test_matching() {
        let record = ImportedPost::new(ts(), 10, 20, "foo", "https://s", "T");
        assert!(record.matches_remote(10, "https://s"));
        assert!(!record.matches_remote(10, "https://other"));
        assert!(!record.matches_remote(11, "https://s"));
        assert!(record.matches_slug_base("foo-2", "https://s"));
        assert!(!record.matches_slug_base("foo-2", "https://other"));
        assert!(!record.matches_slug_base("food", "https://s"));
        assert!(!record.matches_slug_base("", "https://s"));
    }
}
