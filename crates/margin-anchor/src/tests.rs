//! End-to-end restoration over small chat pages.

use chrono::{TimeDelta, Utc};
use margin_core::{
  canonical::CandidateFragment,
  config::AnchorConfig,
  identity::fingerprint,
  record::{Color, Highlight, NewHighlight},
};
use tokio::sync::mpsc;

use crate::{
  AnchorKind, Document, RestoreEngine, RestoreScheduler, RetryPolicy, TextRange, Trigger,
  parse_selector,
  marker::{self, ID_ATTR, find_marker},
};

const PAGE: &str = "https://chat.test/app/42";

fn engine() -> RestoreEngine {
  RestoreEngine::new(&AnchorConfig::default()).expect("default selector parses")
}

fn highlight(text: &str) -> Highlight {
  NewHighlight::new(text, PAGE)
    .with_color(Color::Blue)
    .build(Utc::now(), TimeDelta::days(7))
}

fn chat_page() -> Document {
  Document::from_json(
    r#"[
      { "tag": "div", "attrs": { "class": "user-query" },
        "children": ["Tell me about foxes and dogs please"] },
      { "tag": "div", "attrs": { "class": "model-response" }, "children": [
        { "tag": "p", "children": ["Here is a sentence: the quick brown fox jumps over the lazy dog."] },
        { "tag": "ul", "children": [
          { "tag": "li", "children": ["Foxes are small omnivores."] }
        ] }
      ] },
      { "tag": "div", "attrs": { "class": "user-query" },
        "children": ["And what about cats in general?"] },
      { "tag": "message-content", "children": [
        { "tag": "p", "children": ["Cats are independent animals that sleep a lot."] }
      ] }
    ]"#,
  )
  .expect("valid page")
}

// ─── Candidates and location ─────────────────────────────────────────────────

#[test]
fn only_long_text_inside_response_regions_is_a_candidate() {
  let doc = chat_page();
  let texts: Vec<&str> = engine()
    .candidate_nodes(&doc)
    .into_iter()
    .filter_map(|n| doc.text(n))
    .collect();
  assert_eq!(texts, [
    "Here is a sentence: the quick brown fox jumps over the lazy dog.",
    "Foxes are small omnivores.",
    "Cats are independent animals that sleep a lot.",
  ]);
}

#[test]
fn short_nodes_are_skipped() {
  let doc = Document::from_json(
    r#"[{ "tag": "div", "attrs": { "class": "response" },
          "children": ["exactly10!", " eleven chars "] }]"#,
  )
  .unwrap();
  let found: Vec<&str> = engine()
    .candidate_nodes(&doc)
    .into_iter()
    .filter_map(|n| doc.text(n))
    .collect();
  assert_eq!(found, [" eleven chars "]);
}

#[test]
fn user_turns_are_never_anchored() {
  let doc = chat_page();
  assert!(engine().locate(&doc, "what about cats").is_none());
}

#[test]
fn exact_match_anywhere_beats_an_earlier_partial_match() {
  let doc = Document::from_json(
    r#"[{ "tag": "div", "attrs": { "class": "model-response" }, "children": [
          { "tag": "p", "children": ["alpha beta gamma delta epsilon and more"] },
          { "tag": "p", "children": ["then alpha beta gamma delta zeta"] }
        ] }]"#,
  )
  .unwrap();
  // A window of the needle also occurs in the first paragraph.
  let text = "alpha beta gamma delta zeta";
  let anchor = engine().locate(&doc, text).unwrap();
  assert_eq!(anchor.kind, AnchorKind::Exact);
  assert_eq!(anchor.range.text(&doc).unwrap(), text);
  assert_eq!(anchor.range.start.offset, 5);
}

#[test]
fn partial_match_covers_only_the_window() {
  let doc = chat_page();
  let anchor = engine()
    .locate(&doc, "the quick brown fox was edited after saving")
    .unwrap();
  assert_eq!(anchor.kind, AnchorKind::Partial);
  assert_eq!(anchor.range.text(&doc).unwrap(), "the quick brown fox ");
}

#[test]
fn short_text_never_matches_partially() {
  let doc = chat_page();
  assert!(engine().locate(&doc, "quick red fox").is_none());
  assert!(engine().locate(&doc, "   ").is_none());
}

// ─── Restoration ─────────────────────────────────────────────────────────────

#[test]
fn restore_attaches_one_marker_per_highlight() {
  let mut doc = chat_page();
  let h = highlight("the quick brown fox");
  let report = engine().restore_all(&mut doc, std::slice::from_ref(&h), PAGE);

  assert_eq!(report.attempted, 1);
  assert_eq!(report.restored, 1);
  assert_eq!(report.newly_attached, 1);
  assert!(report.is_complete());

  let markers = doc.find_elements(|e| e.attr(ID_ATTR) == Some(h.id.as_str()));
  // The marker and its indicator.
  assert_eq!(markers.len(), 2);
  let marker = find_marker(&doc, &h.id).unwrap();
  assert_eq!(doc.text_content(marker), "the quick brown fox");
  assert_eq!(doc.element(marker).unwrap().attr("data-color"), Some("blue"));
}

#[test]
fn second_pass_over_an_unchanged_page_is_a_no_op() {
  let mut doc = chat_page();
  let highlights = [highlight("the quick brown fox"), highlight("not on this page at all")];
  let engine = engine();

  let first = engine.restore_all(&mut doc, &highlights, PAGE);
  assert_eq!(first.restored, 1);
  assert_eq!(first.not_found, [highlights[1].id.clone()]);

  let revision = doc.revision();
  let second = engine.restore_all(&mut doc, &highlights, PAGE);
  assert_eq!(second.restored, 1);
  assert_eq!(second.newly_attached, 0);
  assert_eq!(doc.revision(), revision);
}

#[test]
fn highlights_for_other_pages_are_ignored() {
  let mut doc = chat_page();
  let mut other = highlight("the quick brown fox");
  other.url = "https://chat.test/app/other".to_owned();
  let report = engine().restore_all(&mut doc, &[other], PAGE);
  assert_eq!(report.attempted, 0);
  assert_eq!(doc.revision(), 0);
}

#[test]
fn list_item_highlight_is_wrapped_for_layout() {
  let mut doc = chat_page();
  let h = highlight("small omnivores");
  engine().restore_all(&mut doc, std::slice::from_ref(&h), PAGE);
  let marker = find_marker(&doc, &h.id).unwrap();
  let wrapper = doc.parent(marker).unwrap();
  assert!(doc.has_class(wrapper, marker::WRAPPER_CLASS));
}

#[test]
fn removing_a_marker_restores_the_text() {
  let mut doc = chat_page();
  let before = doc.to_html();
  let h = highlight("the quick brown fox");
  engine().restore_all(&mut doc, std::slice::from_ref(&h), PAGE);
  assert_ne!(doc.to_html(), before);

  assert!(marker::detach(&mut doc, &h.id).unwrap());
  assert_eq!(doc.to_html(), before);
}

// ─── Selection and related question ──────────────────────────────────────────

#[test]
fn selection_highlight_is_linked_to_the_preceding_question() {
  let mut doc = chat_page();
  let engine = engine();
  let query = parse_selector(".user-query").unwrap();
  let questions: Vec<CandidateFragment<_>> = doc
    .query_all(doc.root(), &query)
    .into_iter()
    .map(|n| CandidateFragment::new(n, doc.text_content(n), 0))
    .collect();

  let cats = engine
    .candidate_nodes(&doc)
    .into_iter()
    .find(|n| doc.text(*n).is_some_and(|t| t.starts_with("Cats")))
    .unwrap();
  let related = engine.related_question(&doc, cats, &questions, PAGE);
  assert_eq!(
    related.as_deref(),
    Some(fingerprint("And what about cats in general?", PAGE).as_str())
  );

  let h = highlight("independent");
  let marker = engine
    .highlight_selection(&mut doc, &TextRange::within(cats, 9..20), &h)
    .unwrap();
  assert_eq!(doc.text_content(marker), "independent");
  let again = engine
    .highlight_selection(&mut doc, &TextRange::within(cats, 0..4), &h)
    .unwrap();
  assert_eq!(again, marker);
}

#[test]
fn related_question_falls_back_to_the_last_one() {
  let doc = chat_page();
  let first_text = doc.text_nodes(doc.root())[0];
  let later: Vec<CandidateFragment<_>> = doc
    .text_nodes(doc.root())
    .into_iter()
    .skip(1)
    .take(2)
    .map(|n| CandidateFragment::new(n, "later turn", 0))
    .collect();
  let related = engine().related_question(&doc, first_text, &later, PAGE);
  assert_eq!(related, Some(fingerprint("later turn", PAGE)));
  assert!(engine().related_question(&doc, first_text, &[], PAGE).is_none());
}

// ─── Content changes ─────────────────────────────────────────────────────────

#[test]
fn added_response_regions_are_detected() {
  let mut doc = chat_page();
  let engine = engine();

  let plain = doc.create_element("div");
  doc.append_child(doc.root(), plain).unwrap();
  let added = doc.take_added();
  assert!(!engine.touches_response_region(&doc, &added));

  let outer = doc.create_element("section");
  let inner = doc.create_element("message-content");
  doc.append_child(outer, inner).unwrap();
  doc.append_child(doc.root(), outer).unwrap();
  let added = doc.take_added();
  assert_eq!(added, [outer]);
  assert!(engine.touches_response_region(&doc, &added));
}

#[tokio::test(start_paused = true)]
async fn late_rendered_response_is_restored_by_a_later_pass() {
  let doc = std::cell::RefCell::new(chat_page());
  let engine = engine();
  let h = highlight("a late answer about parrots");

  let (tx, rx) = mpsc::channel(4);
  drop(tx);
  let records = RestoreScheduler::new(RetryPolicy::default())
    .run(rx, |trigger| {
      let mut doc = doc.borrow_mut();
      if trigger == (Trigger::Scheduled { attempt: 2 }) {
        let region = doc.create_element("message-content");
        let text = doc.create_text("Here comes a late answer about parrots.");
        doc.append_child(region, text).unwrap();
        let root = doc.root();
        doc.append_child(root, region).unwrap();
      }
      engine.restore_all(&mut doc, std::slice::from_ref(&h), PAGE)
    })
    .await;

  let restored: Vec<usize> = records.iter().map(|r| r.report.restored).collect();
  assert_eq!(restored, [0, 0, 1]);
  assert!(find_marker(&doc.borrow(), &h.id).is_some());
}
