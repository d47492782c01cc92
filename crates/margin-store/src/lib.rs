//! The annotation store: bookmarks and highlights held in memory and written
//! through to a [`KvStore`](margin_core::kv::KvStore) after every mutation.
//!
//! Records expire after a fixed TTL. When the transport reports that its
//! quota is exhausted, the store evicts expired, old and oversized data and
//! retries the write once.

mod collection;
mod memory;
mod status;
mod store;

pub mod error;

pub use collection::Collection;
pub use error::{Error, Result};
pub use memory::{MemoryKv, MemoryKvError};
pub use status::SaveStatus;
pub use store::{AnnotationStore, SaveOutcome, Stored};
