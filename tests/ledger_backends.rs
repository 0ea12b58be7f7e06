//! Behaviour shared by every import ledger backend.
//!
//! Each test opens both the flat-file and the SQLite ledger through
//! `open_ledger` in a fresh temp directory and runs the same assertions
//! against each.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

use autosync::config::{LedgerBackend, LedgerConfig};
use autosync::storage::{open_ledger, ImportedPost, LogStore};

const SOURCE: &str = "https://source.example/wp-json";

async fn ledgers(name: &str) -> (PathBuf, Vec<(LedgerBackend, Arc<dyn LogStore>)>) {
    let dir = std::env::temp_dir().join(format!("autosync_ledger_backends_{name}"));
    let _ = std::fs::remove_dir_all(&dir);

    let mut out = Vec::new();
    for backend in [LedgerBackend::File, LedgerBackend::Sqlite] {
        let config = LedgerConfig {
            backend,
            path: None,
        };
        out.push((backend, open_ledger(&config, &dir).await.unwrap()));
    }
    (dir, out)
}

fn record(remote_id: u64, slug: &str, title: &str) -> ImportedPost {
    let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(9, 30, remote_id as u32 % 60)
        .unwrap();
    ImportedPost::new(ts, remote_id, remote_id + 1000, slug, SOURCE, title)
}

// ============================================================================
// Lookups
// ============================================================================

#[tokio::test]
async fn test_exists_is_scoped_to_source() {
    let (dir, ledgers) = ledgers("exists").await;
    for (backend, ledger) in ledgers {
        ledger.append(&record(42, "answer", "Answer")).await.unwrap();

        assert!(ledger.exists(42, SOURCE).await.unwrap(), "{backend:?}");
        assert!(!ledger.exists(42, "https://elsewhere.example").await.unwrap(), "{backend:?}");
        assert!(!ledger.exists(43, SOURCE).await.unwrap(), "{backend:?}");
    }
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_slug_base_matches_numeric_suffixes_only() {
    let (dir, ledgers) = ledgers("slug_base").await;
    for (backend, ledger) in ledgers {
        ledger.append(&record(1, "launch-day-3", "Launch")).await.unwrap();

        assert!(ledger.exists_by_slug_base("launch-day", SOURCE).await.unwrap(), "{backend:?}");
        assert!(ledger.exists_by_slug_base("launch-day-7", SOURCE).await.unwrap(), "{backend:?}");
        assert!(!ledger.exists_by_slug_base("launch", SOURCE).await.unwrap(), "{backend:?}");
        assert!(!ledger.exists_by_slug_base("", SOURCE).await.unwrap(), "{backend:?}");
    }
    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Listing and counting
// ============================================================================

#[tokio::test]
async fn test_list_newest_first_with_paging() {
    let (dir, ledgers) = ledgers("list").await;
    for (backend, ledger) in ledgers {
        for id in 1..=5 {
            ledger.append(&record(id, &format!("post-{id}x"), "T")).await.unwrap();
        }

        let page: Vec<u64> = ledger
            .list(2, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.remote_id)
            .collect();
        assert_eq!(page, vec![4, 3], "{backend:?}");
        assert!(ledger.list(10, 5).await.unwrap().is_empty(), "{backend:?}");
        assert_eq!(ledger.count().await.unwrap(), 5, "{backend:?}");
        assert!(ledger.size_bytes().await.unwrap() > 0, "{backend:?}");
    }
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_fields_survive_storage() {
    let (dir, ledgers) = ledgers("fields").await;
    for (backend, ledger) in ledgers {
        let original = record(7, "tabs-and-pipes", "Line one\nline | two");
        ledger.append(&original).await.unwrap();

        let stored = ledger.list(1, 0).await.unwrap().remove(0);
        assert_eq!(stored, original, "{backend:?}");
        assert_eq!(stored.title, "Line one line | two", "{backend:?}");
    }
    std::fs::remove_dir_all(&dir).ok();
}

// ============================================================================
// Clear
// ============================================================================

#[tokio::test]
async fn test_clear_reports_whether_anything_was_deleted() {
    let (dir, ledgers) = ledgers("clear").await;
    for (backend, ledger) in ledgers {
        assert!(!ledger.clear().await.unwrap(), "{backend:?}");

        ledger.append(&record(1, "a", "A")).await.unwrap();
        assert!(ledger.clear().await.unwrap(), "{backend:?}");
        assert_eq!(ledger.count().await.unwrap(), 0, "{backend:?}");
        assert!(!ledger.exists(1, SOURCE).await.unwrap(), "{backend:?}");

        // Usable again after a clear.
        ledger.append(&record(2, "b", "B")).await.unwrap();
        assert_eq!(ledger.count().await.unwrap(), 1, "{backend:?}");
    }
    std::fs::remove_dir_all(&dir).ok();
}
