//! Error types for `margin-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown highlight color: {0:?}")]
  UnknownColor(String),

  #[error("invalid url {url:?}: {source}")]
  InvalidUrl {
    url:    String,
    #[source]
    source: url::ParseError,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
