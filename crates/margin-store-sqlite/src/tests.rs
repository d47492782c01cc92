//! Integration tests for `SqliteKv` against an in-memory database.

use margin_core::{
  config::RetentionConfig,
  kv::{KvMap, KvStore, StorageError},
  record::{BOOKMARKS_NAMESPACE, Bookmark},
};
use margin_store::AnnotationStore;
use serde_json::{Value, json};

use crate::{Error, SqliteKv};

async fn kv() -> SqliteKv {
  SqliteKv::open_in_memory()
    .await
    .expect("in-memory store")
}

fn entries(pairs: &[(&str, Value)]) -> KvMap {
  pairs
    .iter()
    .map(|(k, v)| ((*k).to_owned(), v.clone()))
    .collect()
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_then_get_returns_json_values() {
  let kv = kv().await;
  kv.set(entries(&[("a", json!({ "x": 1 })), ("b", json!([1, 2]))]))
    .await
    .unwrap();

  let got = kv.get(&["a", "b", "missing"]).await.unwrap();
  assert_eq!(got.len(), 2);
  assert_eq!(got["a"], json!({ "x": 1 }));
  assert_eq!(got["b"], json!([1, 2]));
}

#[tokio::test]
async fn set_overwrites_existing_keys() {
  let kv = kv().await;
  kv.set(entries(&[("a", json!("old"))])).await.unwrap();
  kv.set(entries(&[("a", json!("new"))])).await.unwrap();
  assert_eq!(kv.get(&["a"]).await.unwrap()["a"], json!("new"));
  assert_eq!(kv.keys().await.unwrap(), ["a"]);
}

#[tokio::test]
async fn remove_ignores_absent_keys() {
  let kv = kv().await;
  kv.set(entries(&[("a", json!(1)), ("b", json!(2))]))
    .await
    .unwrap();
  kv.remove(&["a", "nope"]).await.unwrap();
  assert_eq!(kv.keys().await.unwrap(), ["b"]);
}

#[tokio::test]
async fn used_bytes_counts_keys_and_values() {
  let kv = kv().await;
  assert_eq!(kv.used_bytes().await.unwrap(), 0);
  kv.set(entries(&[("ab", json!("xyz"))])).await.unwrap();
  // key "ab" plus the JSON text "\"xyz\"".
  assert_eq!(kv.used_bytes().await.unwrap(), 2 + 5);
}

// ─── Quota ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn write_over_quota_is_rolled_back() {
  let kv = kv().await.with_quota(Some(32));
  kv.set(entries(&[("small", json!("ok"))])).await.unwrap();

  let err = kv
    .set(entries(&[
      ("small", json!("replaced")),
      ("big", json!("x".repeat(64))),
    ]))
    .await
    .unwrap_err();
  assert!(err.is_quota_exceeded());
  assert!(matches!(err, Error::QuotaExceeded { quota: 32, .. }));

  let got = kv.get(&["small", "big"]).await.unwrap();
  assert_eq!(got["small"], json!("ok"));
  assert!(!got.contains_key("big"));
}

#[tokio::test]
async fn zero_quota_means_unlimited() {
  let kv = kv().await.with_quota(Some(0));
  kv.set(entries(&[("big", json!("x".repeat(10_000)))]))
    .await
    .unwrap();
}

// ─── Annotation store on SQLite ──────────────────────────────────────────────

#[tokio::test]
async fn annotation_store_persists_through_sqlite() {
  let kv = kv().await;
  let mut store = AnnotationStore::open(kv.clone(), RetentionConfig::default())
    .await
    .unwrap();
  let outcome = store
    .save_bookmark("What does Pin guarantee?", "https://chat.test/app/1", None)
    .await
    .unwrap();

  let mut reopened = AnnotationStore::open(kv.clone(), RetentionConfig::default())
    .await
    .unwrap();
  let loaded: Bookmark = reopened.get(&outcome.id).unwrap();
  assert_eq!(loaded.text, "What does Pin guarantee?");

  let raw = kv.get(&[BOOKMARKS_NAMESPACE]).await.unwrap();
  assert!(raw[BOOKMARKS_NAMESPACE][&outcome.id]["timestamp"].is_i64());
}

#[tokio::test]
async fn annotation_store_recovers_from_quota_by_eviction() {
  // Three bookmarks with 1000-character notes fit, a fourth does not.
  let kv = kv().await.with_quota(Some(4_000));
  let retention = RetentionConfig {
    max_bookmarks: 3,
    ..RetentionConfig::default()
  };
  let mut store = AnnotationStore::open(kv.clone(), retention).await.unwrap();

  let mut outcomes = Vec::new();
  for i in 0..4 {
    let outcome = store
      .save_bookmark(
        &format!("question {i}"),
        "https://chat.test/app/1",
        Some("n".repeat(1_000)),
      )
      .await
      .unwrap();
    outcomes.push(outcome);
  }

  assert_eq!(store.eviction_runs(), 1);
  assert!(outcomes[..3].iter().all(|o| o.evicted.is_none()));
  // One bookmark dropped, three notes truncated.
  assert_eq!(outcomes[3].evicted, Some(4));
  assert_eq!(store.bookmarks().count(), 3);
  assert!(store.is_bookmarked(&outcomes[3].id));
  assert!(!store.is_bookmarked(&outcomes[0].id));
  assert!(kv.used_bytes().await.unwrap() <= 4_000);
}
