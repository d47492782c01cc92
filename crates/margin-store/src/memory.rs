//! An in-process [`KvStore`], used by tests and by callers that do not need
//! durability.

use std::{
  collections::VecDeque,
  future::Future,
  sync::{Mutex, MutexGuard, PoisonError},
};

use margin_core::kv::{KvMap, KvStore, StorageError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum MemoryKvError {
  #[error("quota exceeded: {used} of {quota} bytes")]
  QuotaExceeded { used: usize, quota: usize },

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

impl StorageError for MemoryKvError {
  fn is_quota_exceeded(&self) -> bool { matches!(self, Self::QuotaExceeded { .. }) }
}

#[derive(Default)]
struct Inner {
  data:     KvMap,
  quota:    Option<usize>,
  /// Errors returned by the next `set` calls, front first.
  scripted: VecDeque<MemoryKvError>,
  writes:   usize,
}

impl Inner {
  fn size_of(map: &KvMap) -> usize {
    map
      .iter()
      .map(|(k, v)| k.len() + v.to_string().len())
      .sum()
  }
}

/// A [`KvStore`] over a mutex-guarded JSON map.
///
/// Size is measured as key bytes plus serialised value bytes, the same way
/// the browser accounts for its local storage area.
#[derive(Default)]
pub struct MemoryKv {
  inner: Mutex<Inner>,
}

impl MemoryKv {
  pub fn new() -> Self { Self::default() }

  /// A store that rejects writes leaving more than `quota` bytes stored.
  pub fn with_quota(quota: usize) -> Self {
    let kv = Self::default();
    kv.lock().quota = Some(quota);
    kv
  }

  /// Make the next `set` fail with `error` without touching the data.
  pub fn fail_next(&self, error: MemoryKvError) {
    self.lock().scripted.push_back(error);
  }

  /// Successful `set` calls so far.
  pub fn writes(&self) -> usize { self.lock().writes }

  pub fn used_bytes(&self) -> usize { Inner::size_of(&self.lock().data) }

  /// A copy of everything stored.
  pub fn snapshot(&self) -> KvMap { self.lock().data.clone() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl KvStore for MemoryKv {
  type Error = MemoryKvError;

  fn get<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<KvMap, Self::Error>> + Send + 'a {
    async move {
      let inner = self.lock();
      Ok(
        keys
          .iter()
          .filter_map(|k| inner.data.get(*k).map(|v| ((*k).to_owned(), v.clone())))
          .collect(),
      )
    }
  }

  fn set(
    &self,
    entries: KvMap,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    async move {
      let mut inner = self.lock();
      if let Some(error) = inner.scripted.pop_front() {
        return Err(error);
      }

      let mut next = inner.data.clone();
      next.extend(entries);
      if let Some(quota) = inner.quota {
        let used = Inner::size_of(&next);
        if used > quota {
          return Err(MemoryKvError::QuotaExceeded { used, quota });
        }
      }
      inner.data = next;
      inner.writes += 1;
      Ok(())
    }
  }

  fn remove<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    async move {
      let mut inner = self.lock();
      for key in keys {
        inner.data.remove(*key);
      }
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn entry(key: &str, value: serde_json::Value) -> KvMap {
    let mut map = KvMap::new();
    map.insert(key.to_owned(), value);
    map
  }

  #[tokio::test]
  async fn get_returns_only_present_keys() {
    let kv = MemoryKv::new();
    kv.set(entry("a", json!(1))).await.unwrap();
    let got = kv.get(&["a", "b"]).await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got["a"], json!(1));
  }

  #[tokio::test]
  async fn rejected_write_leaves_data_untouched() {
    let kv = MemoryKv::with_quota(16);
    kv.set(entry("a", json!("tiny"))).await.unwrap();
    let err = kv
      .set(entry("b", json!("far too long for the quota")))
      .await
      .unwrap_err();
    assert!(err.is_quota_exceeded());
    assert!(kv.get(&["b"]).await.unwrap().is_empty());
    assert_eq!(kv.writes(), 1);
  }

  #[tokio::test]
  async fn scripted_failures_fire_once() {
    let kv = MemoryKv::new();
    kv.fail_next(MemoryKvError::Unavailable("offline".into()));
    let err = kv.set(entry("a", json!(1))).await.unwrap_err();
    assert!(!err.is_quota_exceeded());
    kv.set(entry("a", json!(1))).await.unwrap();
  }
}
