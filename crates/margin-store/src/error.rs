//! Error type for `margin-store`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] margin_core::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The transport is still full after forced eviction freed `evicted` items.
  #[error("storage quota exceeded even after evicting {evicted} items")]
  QuotaExceeded { evicted: usize },

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("storage self-test failed: {0}")]
  Probe(String),

  #[error("bookmark not found: {0}")]
  BookmarkNotFound(String),

  #[error("highlight not found: {0}")]
  HighlightNotFound(String),
}

impl Error {
  pub(crate) fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
