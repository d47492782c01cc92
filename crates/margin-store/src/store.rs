//! [`AnnotationStore`], the in-memory collections and their write-through
//! mirror.

use chrono::{DateTime, TimeDelta, Utc};
use margin_core::{
  config::RetentionConfig,
  identity::highlight_id,
  kv::{KvMap, KvStore, StorageError},
  record::{
    Annotation, BOOKMARKS_NAMESPACE, Bookmark, Color, HIGHLIGHTS_NAMESPACE,
    Highlight, NewHighlight,
  },
};
use serde_json::Value;

use crate::{Collection, Error, Result};

const PROBE_KEY: &str = "margin_probe";
const PROBE_VALUE: &str = "probe_value";
const ALL_NAMESPACES: [&str; 2] = [BOOKMARKS_NAMESPACE, HIGHLIGHTS_NAMESPACE];

// ─── Collections ─────────────────────────────────────────────────────────────

/// Both record collections, one per namespace.
pub struct Collections {
  pub bookmarks:  Collection<Bookmark>,
  pub highlights: Collection<Highlight>,
}

/// A record kind the store can hold. Picks the collection the kind lives in.
pub trait Stored: Annotation {
  fn collection(all: &Collections) -> &Collection<Self>;
  fn collection_mut(all: &mut Collections) -> &mut Collection<Self>;
}

impl Stored for Bookmark {
  fn collection(all: &Collections) -> &Collection<Self> { &all.bookmarks }

  fn collection_mut(all: &mut Collections) -> &mut Collection<Self> {
    &mut all.bookmarks
  }
}

impl Stored for Highlight {
  fn collection(all: &Collections) -> &Collection<Self> { &all.highlights }

  fn collection_mut(all: &mut Collections) -> &mut Collection<Self> {
    &mut all.highlights
  }
}

/// What a successful save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
  /// Id of the saved record.
  pub id:      String,
  /// `Some(n)` when the first write hit the quota and forced eviction freed
  /// `n` items before the retry succeeded.
  pub evicted: Option<usize>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Bookmarks and highlights, written through to `K` after every mutation.
///
/// Writes are last-write-wins by id. The in-memory collections stay mutated
/// even when the write fails, so the UI keeps showing what the user did.
pub struct AnnotationStore<K> {
  kv:            K,
  retention:     RetentionConfig,
  data:          Collections,
  eviction_runs: usize,
}

impl<K: KvStore> AnnotationStore<K> {
  /// Self-test the transport, load both namespaces and drop expired records.
  pub async fn open(kv: K, retention: RetentionConfig) -> Result<Self> {
    probe(&kv).await?;

    let loaded = kv
      .get(&ALL_NAMESPACES)
      .await
      .map_err(Error::storage)?;
    let data = Collections {
      bookmarks:  Collection::from_value(loaded.get(BOOKMARKS_NAMESPACE)),
      highlights: Collection::from_value(loaded.get(HIGHLIGHTS_NAMESPACE)),
    };
    tracing::info!(
      bookmarks = data.bookmarks.len(),
      highlights = data.highlights.len(),
      "loaded annotations"
    );

    let mut store = Self {
      kv,
      retention,
      data,
      eviction_runs: 0,
    };
    store.sweep_expired().await?;
    Ok(store)
  }

  pub fn retention(&self) -> &RetentionConfig { &self.retention }

  pub fn kv(&self) -> &K { &self.kv }

  /// How many times forced eviction has run since the store was opened.
  pub fn eviction_runs(&self) -> usize { self.eviction_runs }

  pub fn bookmarks(&self) -> impl Iterator<Item = &Bookmark> {
    self.data.bookmarks.iter()
  }

  pub fn highlights(&self) -> impl Iterator<Item = &Highlight> {
    self.data.highlights.iter()
  }

  // ─── Generic record operations ───────────────────────────────────────────

  /// Insert or overwrite `record`, backfilling a missing expiry.
  pub async fn put<R: Stored>(&mut self, mut record: R) -> Result<SaveOutcome> {
    record.ensure_expiry(self.retention.ttl());
    let id = record.id().to_owned();
    R::collection_mut(&mut self.data).insert(record);
    let evicted = self.persist(&[R::NAMESPACE]).await?;
    Ok(SaveOutcome { id, evicted })
  }

  /// Look a record up. An expired record is dropped from memory and reported
  /// absent; storage catches up on the next write or sweep.
  pub fn get<R: Stored>(&mut self, id: &str) -> Option<R> {
    self.get_as_of(id, Utc::now())
  }

  pub fn get_as_of<R: Stored>(&mut self, id: &str, now: DateTime<Utc>) -> Option<R> {
    let ttl = self.retention.ttl();
    let collection = R::collection_mut(&mut self.data);
    let expired = collection.get(id)?.is_expired(now, ttl);
    if expired {
      tracing::debug!(namespace = R::NAMESPACE, id, "dropping expired record on read");
      collection.remove(id);
      return None;
    }
    collection.get(id).cloned()
  }

  /// Remove a record; `Ok(None)` when there was nothing to remove.
  pub async fn remove<R: Stored>(&mut self, id: &str) -> Result<Option<R>> {
    let Some(removed) = R::collection_mut(&mut self.data).remove(id) else {
      return Ok(None);
    };
    self.persist(&[R::NAMESPACE]).await?;
    Ok(Some(removed))
  }

  /// Ids of records of kind `R` that are expired as of `now`.
  pub fn list_expired<R: Stored>(&self, now: DateTime<Utc>) -> Vec<String> {
    let ttl = self.retention.ttl();
    R::collection(&self.data)
      .iter()
      .filter(|r| r.is_expired(now, ttl))
      .map(|r| r.id().to_owned())
      .collect()
  }

  // ─── Retention ───────────────────────────────────────────────────────────

  /// Remove every expired record and persist the result.
  pub async fn sweep_expired(&mut self) -> Result<usize> {
    self.sweep_expired_as_of(Utc::now()).await
  }

  pub async fn sweep_expired_as_of(&mut self, now: DateTime<Utc>) -> Result<usize> {
    let (removed, backfilled) = self.sweep_in_memory(now);
    if removed > 0 || backfilled > 0 {
      self.persist(&ALL_NAMESPACES).await?;
    }
    if removed > 0 {
      tracing::info!(removed, "swept expired annotations");
    }
    Ok(removed)
  }

  /// Run forced eviction and persist the result.
  pub async fn force_evict(&mut self) -> Result<usize> {
    self.force_evict_as_of(Utc::now()).await
  }

  pub async fn force_evict_as_of(&mut self, now: DateTime<Utc>) -> Result<usize> {
    let evicted = self.evict_in_memory(now);
    self.write(&ALL_NAMESPACES).await?;
    Ok(evicted)
  }

  /// Backfill missing expiries and drop expired records from both
  /// collections. Returns `(removed, backfilled)`.
  fn sweep_in_memory(&mut self, now: DateTime<Utc>) -> (usize, usize) {
    let ttl = self.retention.ttl();
    let mut backfilled = 0;
    for b in self.data.bookmarks.values_mut() {
      if b.expires_at.is_none() {
        b.ensure_expiry(ttl);
        backfilled += 1;
      }
    }
    for h in self.data.highlights.values_mut() {
      if h.expires_at.is_none() {
        h.ensure_expiry(ttl);
        backfilled += 1;
      }
    }

    let removed = self.data.bookmarks.retain(|b| !b.is_expired(now, ttl))
      + self.data.highlights.retain(|h| !h.is_expired(now, ttl));
    (removed, backfilled)
  }

  /// Expired records, then bookmarks beyond the newest `max_bookmarks`, then
  /// over-long notes and comments (truncated, each counted once).
  fn evict_in_memory(&mut self, now: DateTime<Utc>) -> usize {
    self.eviction_runs += 1;
    let (mut evicted, _) = self.sweep_in_memory(now);

    let max = self.retention.max_bookmarks;
    if self.data.bookmarks.len() > max {
      let mut by_age: Vec<(DateTime<Utc>, String)> = self
        .data
        .bookmarks
        .iter()
        .map(|b| (b.created_at, b.id.clone()))
        .collect();
      // Later insertions win ties on equal timestamps.
      by_age.reverse();
      by_age.sort_by(|a, b| b.0.cmp(&a.0));
      for (_, id) in by_age.into_iter().skip(max) {
        self.data.bookmarks.remove(&id);
        evicted += 1;
      }
    }

    let limit = self.retention.max_note_chars;
    evicted += truncate_all(self.data.bookmarks.values_mut(), limit);
    evicted += truncate_all(self.data.highlights.values_mut(), limit);

    tracing::warn!(evicted, run = self.eviction_runs, "forced eviction");
    evicted
  }

  // ─── Persistence ─────────────────────────────────────────────────────────

  fn entries(&self, namespaces: &[&str]) -> Result<KvMap> {
    let mut map = KvMap::new();
    for &ns in namespaces {
      let value = match ns {
        BOOKMARKS_NAMESPACE => self.data.bookmarks.to_value()?,
        HIGHLIGHTS_NAMESPACE => self.data.highlights.to_value()?,
        _ => continue,
      };
      map.insert(ns.to_owned(), value);
    }
    Ok(map)
  }

  async fn write(&self, namespaces: &[&str]) -> Result<(), WriteError<K::Error>> {
    let entries = self.entries(namespaces).map_err(WriteError::Encode)?;
    self.kv.set(entries).await.map_err(WriteError::Kv)
  }

  /// Write `namespaces`; on a quota error evict once and retry with every
  /// namespace, since eviction touches both.
  async fn persist(&mut self, namespaces: &[&str]) -> Result<Option<usize>> {
    match self.write(namespaces).await {
      Ok(()) => return Ok(None),
      Err(WriteError::Kv(e)) if e.is_quota_exceeded() => {
        tracing::warn!(error = %e, "storage quota exceeded; evicting and retrying");
      }
      Err(e) => return Err(e.into()),
    }

    let evicted = self.evict_in_memory(Utc::now());
    match self.write(&ALL_NAMESPACES).await {
      Ok(()) => {
        tracing::info!(evicted, "write succeeded after eviction");
        Ok(Some(evicted))
      }
      Err(WriteError::Kv(e)) if e.is_quota_exceeded() => {
        tracing::warn!(error = %e, evicted, "still over quota after eviction");
        Err(Error::QuotaExceeded { evicted })
      }
      Err(e) => Err(e.into()),
    }
  }

  // ─── Bookmarks ───────────────────────────────────────────────────────────

  /// Bookmark a chat turn. Re-bookmarking the same turn replaces the record,
  /// note included.
  pub async fn save_bookmark(
    &mut self,
    text: &str,
    url: &str,
    note: Option<String>,
  ) -> Result<SaveOutcome> {
    let bookmark = Bookmark::new(text, url, note, Utc::now(), self.retention.ttl());
    tracing::debug!(id = %bookmark.id, "saving bookmark");
    self.put(bookmark).await
  }

  /// Set the note of bookmark `id`; an empty note clears it.
  ///
  /// When the bookmark does not exist and `fallback` (text, url) is given, a
  /// bookmark is created under `id` from it, carrying the note.
  pub async fn update_note(
    &mut self,
    id: &str,
    note: &str,
    fallback: Option<(&str, &str)>,
  ) -> Result<SaveOutcome> {
    let note = Some(note.to_owned()).filter(|n| !n.trim().is_empty());
    let bookmark = match self.get::<Bookmark>(id) {
      Some(mut existing) => {
        existing.note = note;
        existing
      }
      None => {
        let Some((text, url)) = fallback else {
          return Err(Error::BookmarkNotFound(id.to_owned()));
        };
        tracing::info!(id, "bookmark missing; creating it to hold the note");
        let mut created =
          Bookmark::new(text, url, note, Utc::now(), self.retention.ttl());
        created.id = id.to_owned();
        created
      }
    };
    self.put(bookmark).await
  }

  pub fn is_bookmarked(&mut self, id: &str) -> bool { self.get::<Bookmark>(id).is_some() }

  pub async fn remove_bookmark(&mut self, id: &str) -> Result<Option<Bookmark>> {
    self.remove(id).await
  }

  /// Live bookmarks on the page `url` (path and query), newest first.
  pub fn bookmarks_for_page(&self, url: &str) -> Vec<Bookmark> {
    let mut page: Vec<Bookmark> = self
      .live_bookmarks(Utc::now())
      .filter(|b| b.on_page(url))
      .cloned()
      .collect();
    newest_first(&mut page);
    page
  }

  /// Live bookmarks grouped by full URL. Items and groups are newest first.
  pub fn bookmarks_by_url(&self) -> Vec<(String, Vec<Bookmark>)> {
    let mut groups: Vec<(String, Vec<Bookmark>)> = Vec::new();
    for b in self.live_bookmarks(Utc::now()) {
      match groups.iter_mut().find(|(url, _)| *url == b.url) {
        Some((_, items)) => items.push(b.clone()),
        None => groups.push((b.url.clone(), vec![b.clone()])),
      }
    }
    for (_, items) in &mut groups {
      newest_first(items);
    }
    groups.sort_by(|a, b| b.1[0].created_at.cmp(&a.1[0].created_at));
    groups
  }

  /// Case-insensitive search over bookmark text and note, newest first. An
  /// empty term matches everything.
  pub fn search_bookmarks(&self, term: &str, notes_only: bool) -> Vec<Bookmark> {
    let needle = term.trim().to_lowercase();
    let mut hits: Vec<Bookmark> = self
      .live_bookmarks(Utc::now())
      .filter(|b| !notes_only || b.has_note())
      .filter(|b| {
        needle.is_empty()
          || b.text.to_lowercase().contains(&needle)
          || b
            .note
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(&needle))
      })
      .cloned()
      .collect();
    newest_first(&mut hits);
    hits
  }

  fn live_bookmarks(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Bookmark> {
    let ttl = self.retention.ttl();
    self
      .data
      .bookmarks
      .iter()
      .filter(move |b| !b.is_expired(now, ttl))
  }

  // ─── Highlights ──────────────────────────────────────────────────────────

  pub async fn add_highlight(
    &mut self,
    new: NewHighlight,
  ) -> Result<(Highlight, SaveOutcome)> {
    let mut highlight = new.build(Utc::now(), self.retention.ttl());
    // Same text within one millisecond: step the id's timestamp until free.
    let mut stamp = highlight.created_at;
    while self.data.highlights.contains(&highlight.id) {
      stamp += TimeDelta::milliseconds(1);
      highlight.id = highlight_id(&highlight.text, stamp);
    }
    tracing::debug!(id = %highlight.id, color = %highlight.color, "adding highlight");
    let outcome = self.put(highlight.clone()).await?;
    Ok((highlight, outcome))
  }

  pub async fn update_color(&mut self, id: &str, color: Color) -> Result<SaveOutcome> {
    let Some(mut highlight) = self.get::<Highlight>(id) else {
      return Err(Error::HighlightNotFound(id.to_owned()));
    };
    highlight.color = color;
    self.put(highlight).await
  }

  pub async fn remove_highlight(&mut self, id: &str) -> Result<Option<Highlight>> {
    self.remove(id).await
  }

  /// Live highlights on the page `url`, in insertion order.
  pub fn highlights_for_page(&self, url: &str) -> Vec<Highlight> {
    let (now, ttl) = (Utc::now(), self.retention.ttl());
    self
      .data
      .highlights
      .iter()
      .filter(|h| !h.is_expired(now, ttl) && h.on_page(url))
      .cloned()
      .collect()
  }

  /// Live highlights associated with the question `question_id`, newest
  /// first.
  pub fn highlights_for_question(&self, question_id: &str) -> Vec<Highlight> {
    let (now, ttl) = (Utc::now(), self.retention.ttl());
    let mut found: Vec<Highlight> = self
      .data
      .highlights
      .iter()
      .filter(|h| !h.is_expired(now, ttl))
      .filter(|h| h.question_id.as_deref() == Some(question_id))
      .cloned()
      .collect();
    found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    found
  }

  /// Drop every record, in memory and in storage.
  pub async fn clear_all(&mut self) -> Result<()> {
    self.data.bookmarks.clear();
    self.data.highlights.clear();
    self
      .kv
      .remove(&ALL_NAMESPACES)
      .await
      .map_err(Error::storage)?;
    tracing::info!("cleared all annotations");
    Ok(())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// A failed write: either the snapshot did not serialise or the transport
/// refused it. Kept apart so the quota check sees the transport error.
enum WriteError<E> {
  Encode(Error),
  Kv(E),
}

impl<E: StorageError> From<WriteError<E>> for Error {
  fn from(e: WriteError<E>) -> Self {
    match e {
      WriteError::Encode(e) => e,
      WriteError::Kv(e) => Error::storage(e),
    }
  }
}

/// Write, read back and remove a probe key.
///
/// A full store is not fatal here: the data already stored is still readable
/// and eviction will make room on the first real write.
async fn probe<K: KvStore>(kv: &K) -> Result<()> {
  let mut entry = KvMap::new();
  entry.insert(PROBE_KEY.to_owned(), Value::from(PROBE_VALUE));
  match kv.set(entry).await {
    Ok(()) => {}
    Err(e) if e.is_quota_exceeded() => {
      tracing::warn!(error = %e, "storage self-test skipped: store is full");
      return Ok(());
    }
    Err(e) => return Err(Error::Probe(e.to_string())),
  }

  let read = kv
    .get(&[PROBE_KEY])
    .await
    .map_err(|e| Error::Probe(e.to_string()))?;
  kv.remove(&[PROBE_KEY])
    .await
    .map_err(|e| Error::Probe(e.to_string()))?;

  if read.get(PROBE_KEY).and_then(Value::as_str) != Some(PROBE_VALUE) {
    return Err(Error::Probe("probe value did not read back".to_owned()));
  }
  tracing::debug!("storage self-test passed");
  Ok(())
}

fn newest_first(items: &mut [Bookmark]) {
  items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Truncate every annotation text longer than `limit` characters to `limit`
/// characters plus `...`; returns how many were truncated.
fn truncate_all<'a, R: Annotation + 'a>(
  records: impl Iterator<Item = &'a mut R>,
  limit: usize,
) -> usize {
  let mut truncated = 0;
  for record in records {
    if let Some(text) = record.annotation_mut()
      && text.chars().count() > limit
    {
      let mut short: String = text.chars().take(limit).collect();
      short.push_str("...");
      *text = short;
      truncated += 1;
    }
  }
  truncated
}
