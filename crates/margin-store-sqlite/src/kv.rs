//! [`SqliteKv`], the SQLite implementation of [`KvStore`].

use std::path::Path;

use chrono::Utc;
use margin_core::kv::{KvMap, KvStore};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  schema::{SCHEMA, USED_BYTES},
};

/// A key-value area backed by a single SQLite file.
///
/// With a quota set, a `set` that would leave more than `quota` bytes stored
/// is rolled back and fails with [`Error::QuotaExceeded`].
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteKv {
  conn:  tokio_rusqlite::Connection,
  quota: Option<u64>,
}

impl SqliteKv {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let kv = Self { conn, quota: None };
    kv.init_schema().await?;
    Ok(kv)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let kv = Self { conn, quota: None };
    kv.init_schema().await?;
    Ok(kv)
  }

  /// Limit stored bytes to `quota`; `None` or `Some(0)` means unlimited.
  pub fn with_quota(mut self, quota: Option<u64>) -> Self {
    self.quota = quota.filter(|q| *q > 0);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Bytes currently stored, keys included.
  pub async fn used_bytes(&self) -> Result<u64> {
    let used: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row(USED_BYTES, [], |r| r.get(0))?))
      .await?;
    Ok(used.max(0) as u64)
  }

  /// Every stored key, sorted.
  pub async fn keys(&self) -> Result<Vec<String>> {
    let keys = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(keys)
  }
}

// ─── KvStore impl ────────────────────────────────────────────────────────────

impl KvStore for SqliteKv {
  type Error = Error;

  async fn get<'a>(&'a self, keys: &'a [&'a str]) -> Result<KvMap> {
    let keys: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();

    let raw: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
          let value: Option<String> = stmt
            .query_row(rusqlite::params![key], |r| r.get(0))
            .optional()?;
          if let Some(value) = value {
            found.push((key, value));
          }
        }
        Ok(found)
      })
      .await?;

    let mut map = KvMap::new();
    for (key, value) in raw {
      map.insert(key, serde_json::from_str(&value)?);
    }
    Ok(map)
  }

  async fn set(&self, entries: KvMap) -> Result<()> {
    let rows: Vec<(String, String)> = entries
      .into_iter()
      .map(|(k, v)| (k, v.to_string()))
      .collect();
    let quota = self.quota;
    let now = Utc::now().to_rfc3339();

    let over: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
          )?;
          for (key, value) in &rows {
            stmt.execute(rusqlite::params![key, value, now])?;
          }
        }

        if let Some(quota) = quota {
          let used: i64 = tx.query_row(USED_BYTES, [], |r| r.get(0))?;
          if used > quota as i64 {
            // Dropping the transaction rolls it back.
            return Ok(Some(used));
          }
        }
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match (over, self.quota) {
      (Some(used), Some(quota)) => {
        tracing::debug!(used, quota, "rejected write over quota");
        Err(Error::QuotaExceeded {
          used: used.max(0) as u64,
          quota,
        })
      }
      _ => Ok(()),
    }
  }

  async fn remove<'a>(&'a self, keys: &'a [&'a str]) -> Result<()> {
    let keys: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for key in &keys {
          tx.execute("DELETE FROM kv WHERE key = ?1", rusqlite::params![key])?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
