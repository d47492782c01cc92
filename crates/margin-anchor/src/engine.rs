//! Re-anchor stored highlights in a freshly rendered page.
//!
//! A pass looks at every text node inside a response region (see
//! [`AnchorConfig::region_selector`]) that carries more than
//! `min_node_chars` of trimmed text. Each highlight is first searched for
//! verbatim across all candidates; only when that fails is a sliding window
//! of its text tried, and the marker then covers just the window.

use margin_core::{
  canonical::CandidateFragment,
  config::AnchorConfig,
  identity::fingerprint,
  record::Highlight,
  similarity::{WindowParams, find_window},
};
use scraper::Selector;
use serde::Serialize;

use crate::{
  Document, NodeId, Result, TextRange,
  dom::parse_selector,
  marker::{self, find_marker},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
  /// The whole highlight text was found.
  Exact,
  /// Only a window of it was found.
  Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
  pub range: TextRange,
  pub kind:  AnchorKind,
}

/// Outcome of one restoration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
  /// Highlights stored for the page.
  pub attempted:      usize,
  /// Highlights with a marker after the pass, already present ones included.
  pub restored:       usize,
  /// Markers created by this pass.
  pub newly_attached: usize,
  /// Ids that could not be anchored.
  pub not_found:      Vec<String>,
}

impl RestoreReport {
  pub fn is_complete(&self) -> bool { self.restored == self.attempted }
}

pub struct RestoreEngine {
  region:         Selector,
  min_node_chars: usize,
  window:         WindowParams,
}

impl RestoreEngine {
  pub fn new(config: &AnchorConfig) -> Result<Self> {
    Ok(Self {
      region:         parse_selector(&config.region_selector)?,
      min_node_chars: config.min_node_chars,
      window:         WindowParams::from(config),
    })
  }

  pub fn region(&self) -> &Selector { &self.region }

  /// Text nodes eligible for anchoring, in document order.
  pub fn candidate_nodes(&self, doc: &Document) -> Vec<NodeId> {
    doc
      .text_nodes(doc.root())
      .into_iter()
      .filter(|n| {
        doc
          .text(*n)
          .is_some_and(|t| t.trim().chars().count() > self.min_node_chars)
      })
      .filter(|n| {
        doc
          .parent(*n)
          .and_then(|p| doc.closest(p, &self.region))
          .is_some()
      })
      .collect()
  }

  /// Find where `text` sits in `doc`, preferring a verbatim match anywhere
  /// over a partial one.
  pub fn locate(&self, doc: &Document, text: &str) -> Option<Anchor> {
    if text.trim().is_empty() {
      return None;
    }
    let candidates = self.candidate_nodes(doc);

    let exact = candidates.iter().find_map(|n| {
      let at = doc.text(*n)?.find(text)?;
      Some(TextRange::within(*n, at..at + text.len()))
    });
    if let Some(range) = exact {
      return Some(Anchor {
        range,
        kind: AnchorKind::Exact,
      });
    }

    candidates.iter().find_map(|n| {
      let hit = find_window(doc.text(*n)?, text, &self.window)?;
      Some(Anchor {
        range: TextRange::within(*n, hit.range),
        kind:  AnchorKind::Partial,
      })
    })
  }

  /// Anchor every highlight stored for `url` that has no marker yet.
  ///
  /// Running a pass twice over an unchanged page does not touch it.
  pub fn restore_all(
    &self,
    doc: &mut Document,
    highlights: &[Highlight],
    url: &str,
  ) -> RestoreReport {
    let mut report = RestoreReport::default();
    for highlight in highlights.iter().filter(|h| h.on_page(url)) {
      report.attempted += 1;
      if find_marker(doc, &highlight.id).is_some() {
        report.restored += 1;
        continue;
      }
      match self.restore_one(doc, highlight) {
        Ok(true) => {
          report.restored += 1;
          report.newly_attached += 1;
        }
        Ok(false) => report.not_found.push(highlight.id.clone()),
        Err(e) => {
          tracing::warn!(id = %highlight.id, error = %e, "failed to attach highlight");
          report.not_found.push(highlight.id.clone());
        }
      }
    }

    tracing::info!(
      attempted = report.attempted,
      restored = report.restored,
      newly_attached = report.newly_attached,
      "restoration pass finished"
    );
    if !report.is_complete() {
      tracing::debug!(missing = ?report.not_found, "highlights not found on page");
    }
    report
  }

  fn restore_one(&self, doc: &mut Document, highlight: &Highlight) -> Result<bool> {
    let Some(anchor) = self.locate(doc, &highlight.text) else {
      return Ok(false);
    };
    tracing::debug!(id = %highlight.id, kind = ?anchor.kind, "anchoring highlight");
    marker::attach(doc, &anchor.range, highlight)?;
    Ok(true)
  }

  /// Mark a user selection. An existing marker for the same highlight is
  /// returned as is.
  pub fn highlight_selection(
    &self,
    doc: &mut Document,
    range: &TextRange,
    highlight: &Highlight,
  ) -> Result<NodeId> {
    if let Some(existing) = find_marker(doc, &highlight.id) {
      return Ok(existing);
    }
    marker::attach(doc, range, highlight)
  }

  /// Fingerprint of the question turn a highlight at `node` belongs to: the
  /// closest question before it, else the last question on the page.
  pub fn related_question(
    &self,
    doc: &Document,
    node: NodeId,
    questions: &[CandidateFragment<NodeId>],
    url: &str,
  ) -> Option<String> {
    questions
      .iter()
      .rev()
      .find(|q| doc.precedes(q.handle, node))
      .or_else(|| questions.last())
      .map(|q| fingerprint(&q.text, url))
  }

  /// Whether any of the `added` nodes is, or contains, a response region.
  pub fn touches_response_region(&self, doc: &Document, added: &[NodeId]) -> bool {
    added.iter().any(|n| {
      doc.matches(*n, &self.region) || !doc.query_all(*n, &self.region).is_empty()
    })
  }
}
