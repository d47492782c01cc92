//! Persisted annotation records: bookmarked questions and highlights.
//!
//! Field names and timestamp encodings follow the browser extension's storage
//! layout (`timestamp` / `expiresAt` in epoch milliseconds, camelCase keys) so
//! existing data loads without migration.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
  Error, Result,
  identity::{fingerprint, highlight_id, same_page},
};

/// Storage namespace holding the bookmark map.
pub const BOOKMARKS_NAMESPACE: &str = "bookmarkedQuestions";
/// Storage namespace holding the highlight map.
pub const HIGHLIGHTS_NAMESPACE: &str = "highlightData";

// ─── Palette ─────────────────────────────────────────────────────────────────

/// The fixed highlight palette. Unknown stored values load as
/// [`Color::Yellow`].
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  AsRefStr,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Color {
  #[default]
  Yellow,
  Green,
  Blue,
  Pink,
  Orange,
}

/// Inline style values for one palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorStyle {
  pub background:    &'static str,
  pub border_bottom: &'static str,
  pub box_shadow:    &'static str,
  pub text_color:    &'static str,
}

impl Color {
  /// Strict parse for user input; stored data goes through the lenient
  /// `Deserialize` impl instead.
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownColor(s.to_owned()))
  }

  pub fn style(self) -> ColorStyle {
    match self {
      Self::Yellow => ColorStyle {
        background:    "rgba(255, 235, 59, 0.9)",
        border_bottom: "2px solid #ffc107",
        box_shadow:    "0 1px 3px rgba(255, 193, 7, 0.3)",
        text_color:    "#000000",
      },
      Self::Green => ColorStyle {
        background:    "rgba(76, 175, 80, 0.9)",
        border_bottom: "2px solid #4caf50",
        box_shadow:    "0 1px 3px rgba(76, 175, 80, 0.3)",
        text_color:    "#000000",
      },
      Self::Blue => ColorStyle {
        background:    "rgba(33, 150, 243, 0.9)",
        border_bottom: "2px solid #2196f3",
        box_shadow:    "0 1px 3px rgba(33, 150, 243, 0.3)",
        text_color:    "#ffffff",
      },
      Self::Pink => ColorStyle {
        background:    "rgba(233, 30, 99, 0.9)",
        border_bottom: "2px solid #e91e63",
        box_shadow:    "0 1px 3px rgba(233, 30, 99, 0.3)",
        text_color:    "#ffffff",
      },
      Self::Orange => ColorStyle {
        background:    "rgba(255, 152, 0, 0.9)",
        border_bottom: "2px solid #ff9800",
        box_shadow:    "0 1px 3px rgba(255, 152, 0, 0.3)",
        text_color:    "#000000",
      },
    }
  }
}

impl<'de> Deserialize<'de> for Color {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
  }
}

// ─── Annotation trait ────────────────────────────────────────────────────────

/// Behaviour shared by every persisted record kind.
pub trait Annotation: Clone + Serialize + DeserializeOwned + Send + Sync {
  /// Storage namespace holding the id→record map for this kind.
  const NAMESPACE: &'static str;

  fn id(&self) -> &str;
  fn url(&self) -> &str;
  fn created_at(&self) -> DateTime<Utc>;
  fn expires_at(&self) -> Option<DateTime<Utc>>;
  fn set_expires_at(&mut self, at: DateTime<Utc>);
  /// The free-form user text (note or comment), if any.
  fn annotation_mut(&mut self) -> Option<&mut String>;

  /// Backfill a missing expiry from `created_at + ttl` and return the
  /// effective expiry. Legacy records self-heal instead of reading as expired.
  fn ensure_expiry(&mut self, ttl: TimeDelta) -> DateTime<Utc> {
    match self.expires_at() {
      Some(at) => at,
      None => {
        let at = self.created_at() + ttl;
        self.set_expires_at(at);
        at
      }
    }
  }

  /// Expired strictly before `now`; a missing expiry is derived from `ttl`.
  fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
    let at = self.expires_at().unwrap_or_else(|| self.created_at() + ttl);
    at < now
  }
}

// ─── Bookmark ────────────────────────────────────────────────────────────────

/// A chat turn the user chose to mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
  /// [`fingerprint`] of `text` and `url`.
  pub id:         String,
  pub text:       String,
  /// Full page URL; path and query identify the conversation.
  pub url:        String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note:       Option<String>,
  #[serde(
    rename = "timestamp",
    alias = "createdAt",
    default,
    with = "chrono::serde::ts_milliseconds"
  )]
  pub created_at: DateTime<Utc>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "chrono::serde::ts_milliseconds_option"
  )]
  pub expires_at: Option<DateTime<Utc>>,
}

impl Bookmark {
  /// A fresh bookmark expiring `ttl` after `now`.
  pub fn new(
    text: impl Into<String>,
    url: impl Into<String>,
    note: Option<String>,
    now: DateTime<Utc>,
    ttl: TimeDelta,
  ) -> Self {
    let text = text.into();
    let url = url.into();
    Self {
      id: fingerprint(&text, &url),
      text,
      url,
      note: note.filter(|n| !n.trim().is_empty()),
      created_at: now,
      expires_at: Some(now + ttl),
    }
  }

  pub fn has_note(&self) -> bool {
    self.note.as_deref().is_some_and(|n| !n.trim().is_empty())
  }

  pub fn on_page(&self, url: &str) -> bool { same_page(&self.url, url) }
}

impl Annotation for Bookmark {
  const NAMESPACE: &'static str = BOOKMARKS_NAMESPACE;

  fn id(&self) -> &str { &self.id }

  fn url(&self) -> &str { &self.url }

  fn created_at(&self) -> DateTime<Utc> { self.created_at }

  fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }

  fn set_expires_at(&mut self, at: DateTime<Utc>) { self.expires_at = Some(at); }

  fn annotation_mut(&mut self) -> Option<&mut String> { self.note.as_mut() }
}

// ─── Highlight ───────────────────────────────────────────────────────────────

/// A span of an assistant response the user selected.
///
/// `text` is the anchor target and is never changed after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
  /// [`highlight_id`] of `text` and `created_at`.
  pub id:          String,
  pub text:        String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment:     Option<String>,
  #[serde(default)]
  pub color:       Color,
  /// Best-effort fingerprint of the user turn preceding the highlight.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub question_id: Option<String>,
  pub url:         String,
  #[serde(
    rename = "timestamp",
    alias = "createdAt",
    default,
    with = "chrono::serde::ts_milliseconds"
  )]
  pub created_at:  DateTime<Utc>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "chrono::serde::ts_milliseconds_option"
  )]
  pub expires_at:  Option<DateTime<Utc>>,
}

impl Highlight {
  pub fn has_comment(&self) -> bool {
    self.comment.as_deref().is_some_and(|c| !c.trim().is_empty())
  }

  pub fn on_page(&self, url: &str) -> bool { same_page(&self.url, url) }
}

impl Annotation for Highlight {
  const NAMESPACE: &'static str = HIGHLIGHTS_NAMESPACE;

  fn id(&self) -> &str { &self.id }

  fn url(&self) -> &str { &self.url }

  fn created_at(&self) -> DateTime<Utc> { self.created_at }

  fn expires_at(&self) -> Option<DateTime<Utc>> { self.expires_at }

  fn set_expires_at(&mut self, at: DateTime<Utc>) { self.expires_at = Some(at); }

  fn annotation_mut(&mut self) -> Option<&mut String> { self.comment.as_mut() }
}

// ─── NewHighlight ────────────────────────────────────────────────────────────

/// Input to highlight creation. The id and timestamps are assigned when the
/// record is built.
#[derive(Debug, Clone)]
pub struct NewHighlight {
  pub text:        String,
  pub url:         String,
  pub comment:     Option<String>,
  pub color:       Color,
  pub question_id: Option<String>,
}

impl NewHighlight {
  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      text:        text.into(),
      url:         url.into(),
      comment:     None,
      color:       Color::default(),
      question_id: None,
    }
  }

  pub fn with_color(mut self, color: Color) -> Self {
    self.color = color;
    self
  }

  pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
    self.comment = Some(comment.into());
    self
  }

  /// Build the record, created at `now` and expiring `ttl` later.
  pub fn build(self, now: DateTime<Utc>, ttl: TimeDelta) -> Highlight {
    Highlight {
      id:          highlight_id(&self.text, now),
      text:        self.text,
      comment:     self.comment.filter(|c| !c.trim().is_empty()),
      color:       self.color,
      question_id: self.question_id,
      url:         self.url,
      created_at:  now,
      expires_at:  Some(now + ttl),
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use strum::IntoEnumIterator;

  use super::*;

  fn at(ms: i64) -> DateTime<Utc> { Utc.timestamp_millis_opt(ms).unwrap() }

  #[test]
  fn bookmark_round_trips_extension_layout() {
    let json = r#"{
      "id": "abc", "text": "What is ownership?",
      "url": "https://gemini.google.com/app/1",
      "timestamp": 1700000000000, "expiresAt": 1700604800000,
      "note": "read later"
    }"#;
    let b: Bookmark = serde_json::from_str(json).unwrap();
    assert_eq!(b.created_at, at(1_700_000_000_000));
    assert_eq!(b.expires_at, Some(at(1_700_604_800_000)));
    assert!(b.has_note());

    let out = serde_json::to_value(&b).unwrap();
    assert_eq!(out["timestamp"], 1_700_000_000_000i64);
    assert_eq!(out["expiresAt"], 1_700_604_800_000i64);
  }

  #[test]
  fn legacy_record_backfills_expiry() {
    let json = r#"{ "id": "x", "text": "t", "url": "u", "timestamp": 0 }"#;
    let mut b: Bookmark = serde_json::from_str(json).unwrap();
    assert_eq!(b.expires_at, None);
    let ttl = TimeDelta::days(7);
    assert_eq!(b.ensure_expiry(ttl), at(0) + ttl);
    assert_eq!(b.expires_at, Some(at(0) + ttl));
  }

  #[test]
  fn expiry_is_strict() {
    let ttl = TimeDelta::days(7);
    let b = Bookmark::new("q", "https://x.test/a", None, at(0), ttl);
    assert!(!b.is_expired(at(0) + ttl, ttl));
    assert!(b.is_expired(at(0) + ttl + TimeDelta::milliseconds(1), ttl));
  }

  #[test]
  fn unknown_color_loads_as_yellow() {
    let json = r#"{ "id": "h", "text": "t", "url": "u", "color": "purple" }"#;
    let h: Highlight = serde_json::from_str(json).unwrap();
    assert_eq!(h.color, Color::Yellow);
    assert!(Color::parse("purple").is_err());
    assert_eq!(Color::parse("Blue").unwrap(), Color::Blue);
  }

  #[test]
  fn every_color_has_a_style() {
    for color in Color::iter() {
      assert!(color.style().background.starts_with("rgba("));
      assert_eq!(serde_json::to_value(color).unwrap(), color.as_ref());
    }
  }

  #[test]
  fn new_highlight_assigns_id_and_ttl() {
    let ttl = TimeDelta::days(7);
    let h = NewHighlight::new("the quick brown fox", "https://x.test/a")
      .with_color(Color::Green)
      .with_comment("  ")
      .build(at(5), ttl);
    assert_eq!(h.id, highlight_id("the quick brown fox", at(5)));
    assert_eq!(h.expires_at, Some(at(5) + ttl));
    assert_eq!(h.comment, None);
    assert!(!h.has_comment());
  }
}
