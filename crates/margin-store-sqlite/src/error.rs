//! Error type for `margin-store-sqlite`.

use margin_core::kv::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The write would leave `used` bytes stored, above `quota`. Nothing was
  /// written.
  #[error("quota exceeded: {used} of {quota} bytes")]
  QuotaExceeded { used: u64, quota: u64 },
}

impl StorageError for Error {
  fn is_quota_exceeded(&self) -> bool { matches!(self, Self::QuotaExceeded { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
