//! Fragment canonicalization.
//!
//! The collector probes a page with several structural queries of decreasing
//! specificity (a whole conversation-turn wrapper, then the bubble inside it,
//! then the text leaf), so one logical user turn is usually reported several
//! times: in full, truncated, or as a subset of a richer capture. This module
//! reduces such a list to one fragment per logical turn.

use crate::{config::CanonicalizeConfig, similarity::is_richer};

/// A piece of page text reported by the collector.
///
/// `handle` is whatever the collector uses to point back at the page (an
/// element id, a node index). It is carried through untouched and never
/// dereferenced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFragment<H> {
  pub handle:   H,
  pub text:     String,
  /// Probe priority; lower values come from more specific probes.
  pub priority: u32,
}

impl<H> CandidateFragment<H> {
  pub fn new(handle: H, text: impl Into<String>, priority: u32) -> Self {
    Self {
      handle,
      text: text.into(),
      priority,
    }
  }
}

/// Accepted fragment plus the prefix key it was registered under.
struct Accepted<H> {
  prefix:   String,
  fragment: CandidateFragment<H>,
}

/// Collapses duplicate and overlapping fragments.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
  prefix_chars:      usize,
  containment_ratio: f64,
}

impl Default for Canonicalizer {
  fn default() -> Self { Self::new(&CanonicalizeConfig::default()) }
}

impl Canonicalizer {
  pub fn new(config: &CanonicalizeConfig) -> Self {
    Self {
      prefix_chars:      config.prefix_chars,
      containment_ratio: config.containment_ratio,
    }
  }

  fn prefix(&self, text: &str) -> String {
    text
      .chars()
      .take(self.prefix_chars)
      .collect::<String>()
      .trim()
      .to_owned()
  }

  /// Reduce `fragments` to one entry per logical item.
  ///
  /// Candidates are visited in ascending priority (stable for equal
  /// priorities). A candidate is dropped when an accepted fragment shares its
  /// prefix or contains it while being at least `containment_ratio` times
  /// longer. A candidate that contains accepted fragments by that same ratio
  /// evicts them and is appended, so a superseded capture gives up its slot.
  /// Otherwise it is appended.
  pub fn canonicalize<H: Clone>(
    &self,
    fragments: &[CandidateFragment<H>],
  ) -> Vec<CandidateFragment<H>> {
    let mut ordered: Vec<&CandidateFragment<H>> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.priority);

    let mut accepted: Vec<Accepted<H>> = Vec::new();

    for candidate in ordered {
      let text = candidate.text.as_str();
      if text.trim().is_empty() {
        continue;
      }
      let prefix = self.prefix(text);

      let covered = accepted.iter().any(|a| {
        a.prefix == prefix
          || is_richer(&a.fragment.text, text, self.containment_ratio)
      });
      if covered {
        tracing::trace!(prefix = %prefix, "skipping duplicate or subset fragment");
        continue;
      }

      let before = accepted.len();
      accepted.retain(|a| !is_richer(text, &a.fragment.text, self.containment_ratio));
      if accepted.len() < before {
        tracing::trace!(
          replaced = before - accepted.len(),
          "fragment supersedes earlier capture"
        );
      }
      accepted.push(Accepted {
        prefix,
        fragment: candidate.clone(),
      });
    }

    accepted.into_iter().map(|a| a.fragment).collect()
  }
}

/// [`Canonicalizer::canonicalize`] with default parameters.
pub fn canonicalize<H: Clone>(
  fragments: &[CandidateFragment<H>],
) -> Vec<CandidateFragment<H>> {
  Canonicalizer::default().canonicalize(fragments)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frag(handle: u32, text: &str, priority: u32) -> CandidateFragment<u32> {
    CandidateFragment::new(handle, text, priority)
  }

  fn texts(out: &[CandidateFragment<u32>]) -> Vec<&str> {
    out.iter().map(|f| f.text.as_str()).collect()
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(canonicalize::<u32>(&[]).is_empty());
  }

  #[test]
  fn richer_fragment_replaces_truncated_one() {
    let out = canonicalize(&[
      frag(1, "hello", 0),
      frag(2, "hello world this is a much longer turn", 0),
    ]);
    assert_eq!(texts(&out), ["hello world this is a much longer turn"]);
    assert_eq!(out[0].handle, 2);
  }

  #[test]
  fn subset_of_accepted_fragment_is_skipped() {
    let out = canonicalize(&[
      frag(1, "explain the borrow checker to me in detail", 0),
      frag(2, "borrow checker", 6),
    ]);
    assert_eq!(texts(&out), ["explain the borrow checker to me in detail"]);
  }

  #[test]
  fn same_prefix_is_a_duplicate() {
    let head = "a".repeat(50);
    let out = canonicalize(&[
      frag(1, &format!("{head} first ending"), 0),
      frag(2, &format!("{head} second ending"), 0),
    ]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].handle, 1);
  }

  #[test]
  fn similar_lengths_are_distinct_turns() {
    // Contained but not 1.5x longer: a genuinely different turn.
    let out = canonicalize(&[
      frag(1, "what is the rust borrow checker", 0),
      frag(2, "what is the rust borrow checker doing here", 0),
    ]);
    assert_eq!(
      texts(&out),
      [
        "what is the rust borrow checker",
        "what is the rust borrow checker doing here",
      ]
    );
  }

  #[test]
  fn unrelated_fragments_keep_first_seen_order() {
    let input = [
      frag(1, "first question about lifetimes", 2),
      frag(2, "second question about traits", 2),
      frag(3, "third question about macros", 2),
    ];
    let out = canonicalize(&input);
    assert_eq!(out.iter().map(|f| f.handle).collect::<Vec<_>>(), [1, 2, 3]);
  }

  #[test]
  fn lower_priority_probes_are_processed_first() {
    let out = canonicalize(&[
      frag(1, "leaf text", 7),
      frag(2, "container with the leaf text and surrounding chrome", 0),
    ]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].handle, 2);
  }

  #[test]
  fn superseded_entries_give_up_their_slot() {
    let out = canonicalize(&[
      frag(1, "alpha", 1),
      frag(2, "an unrelated middle question", 1),
      frag(3, "beta", 1),
      frag(4, "alpha and beta together in one much longer turn", 1),
    ]);
    assert_eq!(
      texts(&out),
      [
        "an unrelated middle question",
        "alpha and beta together in one much longer turn",
      ]
    );
  }

  #[test]
  fn canonicalize_is_deterministic() {
    let input = [
      frag(1, "hello", 3),
      frag(2, "hello world this is a much longer turn", 0),
      frag(3, "another turn entirely", 1),
      frag(4, "another turn entirely", 5),
    ];
    let once = canonicalize(&input);
    let twice = canonicalize(&input);
    assert_eq!(once, twice);
    assert_eq!(
      texts(&canonicalize(&once)),
      texts(&once),
      "canonical output is a fixed point"
    );
  }

  #[test]
  fn blank_fragments_are_ignored() {
    let out = canonicalize(&[frag(1, "   ", 0), frag(2, "real question", 0)]);
    assert_eq!(texts(&out), ["real question"]);
  }

  #[test]
  fn ratio_is_configurable() {
    let strict = Canonicalizer::new(&CanonicalizeConfig {
      prefix_chars:      50,
      containment_ratio: 1.1,
    });
    let out = strict.canonicalize(&[
      frag(1, "what is the rust borrow checker", 0),
      frag(2, "what is the rust borrow checker doing here", 0),
    ]);
    assert_eq!(texts(&out), ["what is the rust borrow checker doing here"]);
  }
}
