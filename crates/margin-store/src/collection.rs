//! An insertion-ordered map from id to record, see [`Collection`].

use std::collections::{BTreeMap, HashMap};

use margin_core::record::Annotation;
use serde_json::Value;

use crate::Result;

struct Slot<R> {
  seq:    u64,
  record: R,
}

/// Records keyed by id, iterated in insertion order.
///
/// Overwriting an existing id keeps its original position, so a re-saved
/// record does not jump to the end of the display order.
pub struct Collection<R> {
  records:  HashMap<String, Slot<R>>,
  order:    BTreeMap<u64, String>,
  next_seq: u64,
}

impl<R> Default for Collection<R> {
  fn default() -> Self {
    Self {
      records:  HashMap::new(),
      order:    BTreeMap::new(),
      next_seq: 0,
    }
  }
}

impl<R: Annotation> Collection<R> {
  /// Load from a persisted id → record JSON object.
  ///
  /// Entries that fail to deserialise are skipped with a warning rather than
  /// poisoning the whole collection. The map key wins over a stored `id`.
  pub fn from_value(value: Option<&Value>) -> Self {
    let mut collection = Self::default();
    let Some(Value::Object(map)) = value else {
      return collection;
    };

    for (id, raw) in map {
      match serde_json::from_value::<R>(raw.clone()) {
        Ok(record) if record.id() == id => {
          collection.insert(record);
        }
        Ok(record) => {
          tracing::warn!(key = %id, stored = %record.id(), "record id disagrees with its key; keeping key");
          let mut raw = raw.clone();
          if let Value::Object(fields) = &mut raw {
            fields.insert("id".to_owned(), Value::String(id.clone()));
          }
          if let Ok(record) = serde_json::from_value::<R>(raw) {
            collection.insert(record);
          }
        }
        Err(e) => {
          tracing::warn!(namespace = R::NAMESPACE, key = %id, error = %e, "skipping unreadable record");
        }
      }
    }
    collection
  }

  /// Serialise as an id → record JSON object in insertion order.
  pub fn to_value(&self) -> Result<Value> {
    let mut map = serde_json::Map::with_capacity(self.records.len());
    for record in self.iter() {
      map.insert(record.id().to_owned(), serde_json::to_value(record)?);
    }
    Ok(Value::Object(map))
  }

  /// Insert or overwrite; returns the previous record for the id.
  pub fn insert(&mut self, record: R) -> Option<R> {
    let id = record.id().to_owned();
    if let Some(slot) = self.records.get_mut(&id) {
      return Some(std::mem::replace(&mut slot.record, record));
    }
    let seq = self.next_seq;
    self.next_seq += 1;
    self.order.insert(seq, id.clone());
    self.records.insert(id, Slot { seq, record });
    None
  }

  pub fn get(&self, id: &str) -> Option<&R> {
    self.records.get(id).map(|slot| &slot.record)
  }

  pub fn remove(&mut self, id: &str) -> Option<R> {
    let slot = self.records.remove(id)?;
    self.order.remove(&slot.seq);
    Some(slot.record)
  }

  pub fn contains(&self, id: &str) -> bool { self.records.contains_key(id) }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  /// Records in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = &R> {
    self
      .order
      .values()
      .filter_map(|id| self.records.get(id).map(|slot| &slot.record))
  }

  /// Mutable access to every record, in no particular order.
  pub fn values_mut(&mut self) -> impl Iterator<Item = &mut R> {
    self.records.values_mut().map(|slot| &mut slot.record)
  }

  /// Remove every record for which `keep` returns `false`; returns how many
  /// were removed.
  pub fn retain(&mut self, mut keep: impl FnMut(&R) -> bool) -> usize {
    let doomed: Vec<String> = self
      .iter()
      .filter(|r| !keep(r))
      .map(|r| r.id().to_owned())
      .collect();
    for id in &doomed {
      self.remove(id);
    }
    doomed.len()
  }

  pub fn clear(&mut self) {
    self.records.clear();
    self.order.clear();
  }
}
