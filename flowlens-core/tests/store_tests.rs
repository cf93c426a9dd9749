// Tests for the SQLite-backed key/value store

use flowlens_core::cache::ResultCache;
use flowlens_core::error::StoreError;
use flowlens_core::store::{KvStore, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_store() -> (TempDir, SqliteStore) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");
    let store = SqliteStore::new(&db_path).unwrap();
    (temp_dir, store)
}

// ============================================================================
// Store Creation Tests
// ============================================================================

#[test]
fn test_store_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");

    let store = SqliteStore::new(&db_path);
    assert!(store.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_store_exists() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");

    assert!(!SqliteStore::exists(&db_path));

    let _store = SqliteStore::new(&db_path).unwrap();
    assert!(SqliteStore::exists(&db_path));
}

#[test]
fn test_store_reopen_keeps_entries() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cache.db");

    {
        let store = SqliteStore::new(&db_path).unwrap();
        store.set("flowlens:flows:fw-1:*", "{}").unwrap();
    }

    let store = SqliteStore::new(&db_path).unwrap();
    assert_eq!(store.get("flowlens:flows:fw-1:*").unwrap().as_deref(), Some("{}"));
}

// ============================================================================
// Get / Set Tests
// ============================================================================

#[test]
fn test_get_missing_key() {
    let (_temp_dir, store) = create_test_store();
    assert!(store.get("missing").unwrap().is_none());
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_set_overwrites() {
    let (_temp_dir, store) = create_test_store();

    store.set("k", "first").unwrap();
    store.set("k", "second").unwrap();

    assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_remove_and_clear() {
    let (_temp_dir, store) = create_test_store();

    store.set("a", "1").unwrap();
    store.set("b", "2").unwrap();
    store.set("c", "3").unwrap();

    store.remove("a").unwrap();
    assert!(store.get("a").unwrap().is_none());

    assert_eq!(store.clear().unwrap(), 2);
    assert!(store.is_empty().unwrap());
}

// ============================================================================
// Quota Tests
// ============================================================================

#[test]
fn test_quota_rejects_oversized_write() {
    let store = SqliteStore::open_in_memory().unwrap().with_quota(16);

    let result = store.set("key", &"x".repeat(32));
    assert!(matches!(result, Err(StoreError::QuotaExceeded { limit: 16, .. })));
    assert!(store.get("key").unwrap().is_none());
}

#[test]
fn test_quota_counts_replaced_value_once() {
    let store = SqliteStore::open_in_memory().unwrap().with_quota(20);

    store.set("key", &"x".repeat(15)).unwrap();
    // Same key again: the old value does not count against the new one
    store.set("key", &"y".repeat(15)).unwrap();

    assert_eq!(store.get("key").unwrap(), Some("y".repeat(15)));
}

#[tokio::test]
async fn test_result_cache_over_sqlite() {
    let (_temp_dir, store) = create_test_store();
    let cache = ResultCache::new(Arc::new(store));

    let first = cache
        .get_or_fetch("flowlens:flows:fw-1:*", || async { Ok::<_, String>(vec!["a".to_string()]) })
        .await
        .unwrap();
    let second = cache
        .get_or_fetch("flowlens:flows:fw-1:*", || async { Err::<Vec<String>, _>("should not refetch".to_string()) })
        .await
        .unwrap();

    assert_eq!(first, second);
}
