//! The key-value transport that annotation data is persisted through.
//!
//! The trait is implemented by storage backends (`margin-store`'s in-memory
//! map, `margin-store-sqlite`). The annotation store depends on this
//! abstraction only; it never knows where the bytes end up.

use std::future::Future;

/// A flat key → JSON value map, in insertion order.
pub type KvMap = serde_json::Map<String, serde_json::Value>;

/// Errors surfaced by a [`KvStore`].
///
/// The annotation store needs to tell a full store apart from every other
/// failure: the former is recovered by eviction, the latter is reported.
pub trait StorageError: std::error::Error + Send + Sync + 'static {
  fn is_quota_exceeded(&self) -> bool;
}

/// Abstraction over a persisted key-value area.
///
/// All methods return `Send` futures so implementations can sit behind a
/// multi-threaded runtime.
pub trait KvStore: Send + Sync {
  type Error: StorageError;

  /// Fetch the given keys. Missing keys are absent from the result.
  fn get<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<KvMap, Self::Error>> + Send + 'a;

  /// Write every entry. Either all entries are stored or none is; a write
  /// that would exceed the backend's quota fails with an error whose
  /// [`StorageError::is_quota_exceeded`] is `true`.
  fn set(
    &self,
    entries: KvMap,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete the given keys; absent keys are ignored.
  fn remove<'a>(
    &'a self,
    keys: &'a [&'a str],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
