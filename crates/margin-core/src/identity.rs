//! Content-derived identifiers for bookmarks and highlights.
//!
//! Ids are not random: a bookmark id is a pure function of the visible text of
//! a chat turn and the page it was captured on, so bookmarking the same turn
//! again after a reload resolves to the same record. Highlight ids fold in a
//! creation timestamp because the same text may be highlighted more than once.
//!
//! The encoding matches the browser extension byte for byte
//! (`encodeURIComponent`, then base64 with `+`, `/` and `=` removed), so ids
//! persisted by either side stay interchangeable.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use url::Url;

use crate::{Error, Result};

/// Number of leading characters of a turn's text that contribute to its
/// fingerprint.
pub const FINGERPRINT_PREFIX_CHARS: usize = 50;

/// Number of leading characters of a selection that contribute to a
/// highlight id.
pub const HIGHLIGHT_PREFIX_CHARS: usize = 30;

static FALLBACK_SEQ: AtomicU64 = AtomicU64::new(0);

// ─── Fingerprints ────────────────────────────────────────────────────────────

/// Fingerprint a chat turn: its first 50 characters (whitespace collapsed and
/// trimmed) joined with the path and query of `url`.
///
/// Never fails. Blank text yields a unique `invalid_question_*` sentinel so a
/// caller handing over garbage still gets a usable key.
pub fn fingerprint(text: &str, url: &str) -> String {
  if text.trim().is_empty() {
    tracing::warn!("fingerprint requested for blank text; using fallback id");
    return fallback_id("invalid_question", Utc::now());
  }

  let prefix: String = text.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
  let prefix = collapse_whitespace(&prefix);
  encode(&format!("{prefix}|{}", page_key(url)))
}

/// Id for a new highlight created at `at`.
///
/// Whitespace is stripped from the 30-character prefix and the millisecond
/// timestamp appended. Identical selections made in the same millisecond
/// share an id; the store steps `at` forward until the id is free.
pub fn highlight_id(text: &str, at: DateTime<Utc>) -> String {
  let prefix: String = text
    .chars()
    .take(HIGHLIGHT_PREFIX_CHARS)
    .filter(|c| !c.is_whitespace())
    .collect();
  encode(&format!("{prefix}{}", at.timestamp_millis()))
}

/// `{label}_{millis}_{seq}`; the sequence keeps two sentinels minted in the
/// same millisecond apart.
pub fn fallback_id(label: &str, at: DateTime<Utc>) -> String {
  let seq = FALLBACK_SEQ.fetch_add(1, Ordering::Relaxed);
  format!("{label}_{}_{seq}", at.timestamp_millis())
}

// ─── URLs ────────────────────────────────────────────────────────────────────

/// The part of a page URL that identifies a conversation: path plus query
/// (with its leading `?`). Scheme, host and fragment are ignored.
///
/// Unparsable input is returned unchanged so that matching degrades to exact
/// string comparison instead of failing.
pub fn page_key(url: &str) -> String {
  match Url::parse(url) {
    Ok(parsed) => page_key_of(&parsed),
    Err(_) => url.to_owned(),
  }
}

/// Parse `url`, reporting why it is not usable as a page address.
pub fn parse_url(url: &str) -> Result<Url> {
  Url::parse(url).map_err(|source| Error::InvalidUrl {
    url: url.to_owned(),
    source,
  })
}

/// Whether two page URLs refer to the same conversation.
pub fn same_page(a: &str, b: &str) -> bool { page_key(a) == page_key(b) }

fn page_key_of(url: &Url) -> String {
  match url.query() {
    Some(q) if !q.is_empty() => format!("{}?{q}", url.path()),
    _ => url.path().to_owned(),
  }
}

// ─── Encoding ────────────────────────────────────────────────────────────────

fn collapse_whitespace(text: &str) -> String {
  text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Percent-encode with the `encodeURIComponent` unreserved set, then base64
/// and drop the characters that are awkward in keys and attributes.
fn encode(raw: &str) -> String {
  let escaped = encode_uri_component(raw);
  STANDARD
    .encode(escaped.as_bytes())
    .chars()
    .filter(|c| !matches!(c, '+' | '/' | '='))
    .collect()
}

/// `urlencoding` leaves only `A-Z a-z 0-9 - _ . ~` alone; `encodeURIComponent`
/// additionally keeps `! ' ( ) *`. Every `%` in the output starts an escape
/// triplet, so un-escaping those five is unambiguous.
fn encode_uri_component(raw: &str) -> String {
  urlencoding::encode(raw)
    .replace("%21", "!")
    .replace("%27", "'")
    .replace("%28", "(")
    .replace("%29", ")")
    .replace("%2A", "*")
}
