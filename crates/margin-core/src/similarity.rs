//! Text similarity shared by the fragment canonicalizer and the anchor engine.
//!
//! Three levels of agreement are recognised, from strongest to weakest:
//! exact equality after normalisation, containment of one text in the other,
//! and a windowed substring hit where some fixed-length slice of one text
//! occurs verbatim in the other.

use std::ops::Range;

use crate::config::AnchorConfig;

/// Score reported for a windowed substring hit by [`score`].
pub const WINDOW_SCORE: f64 = 0.6;

/// Texts shorter than this (in characters, after normalisation) are never
/// fuzzily compared by [`score`].
const MIN_FUZZY_CHARS: usize = 10;

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Collapse whitespace runs to a single space, drop zero-width characters and
/// trim.
pub fn normalize(text: &str) -> String {
  text
    .chars()
    .filter(|c| !is_zero_width(*c))
    .collect::<String>()
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn is_zero_width(c: char) -> bool {
  matches!(c, '\u{200B}'..='\u{200F}' | '\u{FEFF}')
}

fn char_len(text: &str) -> usize { text.chars().count() }

// ─── Match kinds ─────────────────────────────────────────────────────────────

/// How two texts relate, strongest relation first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
  /// Equal after [`normalize`].
  Exact,
  /// One contains the other; `ratio` is shorter length over longer length.
  Containment { ratio: f64 },
  /// A window of the shorter text occurs in the other.
  Window,
  None,
}

impl MatchKind {
  /// The 0–1 score conventionally attached to this kind.
  pub fn score(self) -> f64 {
    match self {
      Self::Exact => 1.0,
      Self::Containment { ratio } => ratio,
      Self::Window => WINDOW_SCORE,
      Self::None => 0.0,
    }
  }
}

/// Classify the relation between `a` and `b` after normalisation.
pub fn classify(a: &str, b: &str) -> MatchKind {
  let a = normalize(a);
  let b = normalize(b);

  if a == b {
    return MatchKind::Exact;
  }

  if a.contains(&b) || b.contains(&a) {
    let (la, lb) = (char_len(&a), char_len(&b));
    let (shorter, longer) = if la < lb { (la, lb) } else { (lb, la) };
    return MatchKind::Containment {
      ratio: shorter as f64 / longer as f64,
    };
  }

  let min_len = char_len(&a).min(char_len(&b));
  if min_len < MIN_FUZZY_CHARS {
    return MatchKind::None;
  }

  // A slice of 60% of the shorter text, tried at every offset up to 70% of
  // the way through `a`.
  let window = (min_len as f64 * 0.6).floor() as usize;
  let last_start = char_len(&a) as f64 - min_len as f64 * 0.3;
  let a_chars: Vec<char> = a.chars().collect();
  let mut start = 0usize;
  while start as f64 <= last_start {
    let end = (start + window).min(a_chars.len());
    let slice: String = a_chars[start..end].iter().collect();
    if char_len(&slice) > 5 && b.contains(&slice) {
      return MatchKind::Window;
    }
    start += 1;
  }

  MatchKind::None
}

/// Similarity of `a` and `b` in `0.0..=1.0`.
pub fn score(a: &str, b: &str) -> f64 { classify(a, b).score() }

/// `richer` contains `poorer` verbatim and is at least `ratio` times as long
/// (in characters).
pub fn is_richer(richer: &str, poorer: &str, ratio: f64) -> bool {
  richer.contains(poorer)
    && char_len(richer) as f64 >= char_len(poorer) as f64 * ratio
}

// ─── Windowed search ─────────────────────────────────────────────────────────

/// Sliding-window parameters for partial anchoring.
///
/// The window is `min(cap, fraction * needle_len)` characters, rounded down,
/// and is only used when it reaches `min` characters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowParams {
  pub cap:      usize,
  pub fraction: f64,
  pub min:      usize,
}

impl Default for WindowParams {
  fn default() -> Self {
    Self {
      cap:      20,
      fraction: 0.5,
      min:      10,
    }
  }
}

impl From<&AnchorConfig> for WindowParams {
  fn from(config: &AnchorConfig) -> Self {
    Self {
      cap:      config.window_cap,
      fraction: config.window_fraction,
      min:      config.min_window,
    }
  }
}

impl WindowParams {
  /// Window length in characters for a needle of `needle_chars`, or `None`
  /// when the needle is too short for partial matching.
  pub fn window_len(&self, needle_chars: usize) -> Option<usize> {
    let scaled = (needle_chars as f64 * self.fraction).floor() as usize;
    let len = scaled.min(self.cap);
    (len > 0 && len >= self.min && len <= needle_chars).then_some(len)
  }
}

/// A window of the needle found inside a haystack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHit {
  /// Character offset of the window inside the needle.
  pub needle_offset: usize,
  /// Byte range of the hit inside the haystack.
  pub range:         Range<usize>,
}

/// Slide a window across `needle` from its start and return the first slice
/// that occurs in `haystack`.
pub fn find_window(
  haystack: &str,
  needle: &str,
  params: &WindowParams,
) -> Option<WindowHit> {
  let bounds: Vec<usize> = needle
    .char_indices()
    .map(|(i, _)| i)
    .chain(std::iter::once(needle.len()))
    .collect();
  let needle_chars = bounds.len() - 1;
  let window = params.window_len(needle_chars)?;

  (0..=needle_chars - window).find_map(|offset| {
    let slice = &needle[bounds[offset]..bounds[offset + window]];
    haystack.find(slice).map(|at| WindowHit {
      needle_offset: offset,
      range:         at..at + slice.len(),
    })
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_collapses_and_strips_zero_width() {
    assert_eq!(normalize("  a \n\t b\u{200B}c  "), "a bc");
    assert_eq!(normalize("\u{FEFF}"), "");
  }

  #[test]
  fn classify_orders_relations() {
    assert_eq!(classify("hello  world", "hello world"), MatchKind::Exact);
    assert_eq!(
      classify("quick", "the quick brown fox"),
      MatchKind::Containment { ratio: 5.0 / 19.0 }
    );
    assert_eq!(
      classify(
        "the quick brown fox jumps over",
        "a quick brown fox jumps under the tree"
      ),
      MatchKind::Window
    );
    assert_eq!(classify("short", "other"), MatchKind::None);
  }

  #[test]
  fn score_is_bounded() {
    assert_eq!(score("abc", "abc"), 1.0);
    assert_eq!(score("completely different", "nothing alike here"), 0.0);
    let s = score("brown fox", "the quick brown fox");
    assert!(s > 0.0 && s < 1.0);
  }

  #[test]
  fn richer_requires_ratio() {
    assert!(is_richer("hello world and more", "hello", 1.5));
    assert!(!is_richer("hello!", "hello", 1.5));
    assert!(!is_richer("goodbye world", "hello", 1.5));
  }

  #[test]
  fn window_len_respects_cap_and_minimum() {
    let p = WindowParams::default();
    assert_eq!(p.window_len(100), Some(20));
    assert_eq!(p.window_len(30), Some(15));
    assert_eq!(p.window_len(19), None);
  }

  #[test]
  fn find_window_reports_first_hit() {
    let needle = "alpha beta gamma delta epsilon zeta";
    let haystack = "prefix ... gamma delta epsilon zeta ... suffix";
    let params = WindowParams::default();
    let window = params.window_len(needle.chars().count()).unwrap();
    let hit = find_window(haystack, needle, &params).unwrap();
    assert_eq!(hit.needle_offset, 10);
    assert_eq!(
      &haystack[hit.range.clone()],
      &needle[hit.needle_offset..hit.needle_offset + window]
    );
  }

  #[test]
  fn find_window_handles_multibyte_text() {
    let needle = "所有权是Rust最独特的特性，它让Rust无需垃圾回收";
    let haystack = "前文，它让Rust无需垃圾回收器即可保证内存安全。";
    let hit = find_window(haystack, needle, &WindowParams::default()).unwrap();
    assert!(haystack.is_char_boundary(hit.range.start));
    assert!(haystack.is_char_boundary(hit.range.end));
  }

  #[test]
  fn find_window_misses_cleanly() {
    let params = WindowParams::default();
    assert!(find_window("nothing to see", "completely unrelated needle text", &params).is_none());
  }
}
