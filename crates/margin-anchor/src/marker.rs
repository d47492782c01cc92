//! Highlight markers: the span wrapped around anchored text, plus the small
//! indicator placed after it.

use margin_core::record::{Color, Highlight};
use scraper::{CaseSensitivity, node::Element};
use serde::Serialize;

use crate::{Document, Error, NodeId, Result, TextRange};

pub const MARKER_CLASS: &str = "margin-highlight";
pub const INDICATOR_CLASS: &str = "margin-highlight-indicator";
pub const WRAPPER_CLASS: &str = "margin-highlight-wrapper";
pub const ID_ATTR: &str = "data-highlight-id";
pub const COLOR_ATTR: &str = "data-color";

const COMMENT_GLYPH: &str = "💬";
const PLAIN_GLYPH: &str = "···";
const LIST_TAGS: [&str; 3] = ["li", "ol", "ul"];

/// What a click on a marker or indicator asks the host to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MarkerAction {
  /// Open the detail view for the highlight.
  OpenDetails { highlight_id: String },
  /// Show the highlight's comment in a tooltip.
  ShowComment {
    highlight_id: String,
    comment:      String,
  },
}

/// Inline style for a marker of `color`.
pub fn marker_style(color: Color) -> String {
  let s = color.style();
  format!(
    "background-color: {}; border-bottom: {}; box-shadow: {}; color: {}; \
     border-radius: 2px; padding: 0 1px; cursor: pointer;",
    s.background, s.border_bottom, s.box_shadow, s.text_color
  )
}

fn is_marker_for(element: &Element, class: &str, id: &str) -> bool {
  element.has_class(class, CaseSensitivity::CaseSensitive) && element.attr(ID_ATTR) == Some(id)
}

/// The connected marker for `highlight_id`, if any.
pub fn find_marker(doc: &Document, highlight_id: &str) -> Option<NodeId> {
  doc
    .find_elements(|e| is_marker_for(e, MARKER_CLASS, highlight_id))
    .into_iter()
    .next()
}

fn create_marker(doc: &mut Document, highlight: &Highlight) -> Result<NodeId> {
  let span = doc.create_element("span");
  doc.set_attr(span, "class", MARKER_CLASS)?;
  doc.set_attr(span, ID_ATTR, &highlight.id)?;
  doc.set_attr(span, COLOR_ATTR, highlight.color.as_ref())?;
  doc.set_attr(span, "style", &marker_style(highlight.color))?;
  doc.set_listener(span, MarkerAction::OpenDetails {
    highlight_id: highlight.id.clone(),
  })?;
  Ok(span)
}

fn create_indicator(doc: &mut Document, highlight: &Highlight) -> Result<NodeId> {
  let span = doc.create_element("span");
  doc.set_attr(span, "class", INDICATOR_CLASS)?;
  doc.set_attr(span, ID_ATTR, &highlight.id)?;

  let (glyph, action) = match highlight.comment.as_deref().map(str::trim) {
    Some(comment) if !comment.is_empty() => {
      doc.set_attr(span, "title", comment)?;
      (COMMENT_GLYPH, MarkerAction::ShowComment {
        highlight_id: highlight.id.clone(),
        comment:      comment.to_owned(),
      })
    }
    _ => (PLAIN_GLYPH, MarkerAction::OpenDetails {
      highlight_id: highlight.id.clone(),
    }),
  };
  let text = doc.create_text(glyph);
  doc.append_child(span, text)?;
  doc.set_listener(span, action)?;
  Ok(span)
}

fn in_list(doc: &Document, node: NodeId) -> bool {
  doc
    .ancestors(node)
    .any(|a| doc.tag(a).is_some_and(|t| LIST_TAGS.contains(&t)))
}

/// Wrap `range` in a marker for `highlight` and place its indicator.
///
/// Ranges that cannot be wrapped directly fall back to splitting the start
/// node by hand, clamping the end to that node.
pub fn attach(doc: &mut Document, range: &TextRange, highlight: &Highlight) -> Result<NodeId> {
  let marker = create_marker(doc, highlight)?;
  match range.surround_contents(doc, marker) {
    Ok(()) => {}
    Err(Error::BoundaryCrossing) => {
      tracing::debug!(id = %highlight.id, "range spans nodes, splitting start node");
      split_into(doc, range, marker)?;
    }
    Err(e) => return Err(e),
  }

  let indicator = create_indicator(doc, highlight)?;
  let parent = doc.parent(marker).ok_or(Error::Detached(marker))?;
  if in_list(doc, marker) {
    // Keep marker and indicator on one line inside list items.
    let wrapper = doc.create_element("span");
    doc.set_attr(wrapper, "class", WRAPPER_CLASS)?;
    doc.set_attr(wrapper, ID_ATTR, &highlight.id)?;
    doc.set_attr(wrapper, "style", "white-space: nowrap; display: inline;")?;
    doc.insert_before(parent, wrapper, Some(marker))?;
    doc.append_child(wrapper, marker)?;
    doc.append_child(wrapper, indicator)?;
  } else {
    let next = doc.next_sibling(marker);
    doc.insert_before(parent, indicator, next)?;
  }
  Ok(marker)
}

fn split_into(doc: &mut Document, range: &TextRange, marker: NodeId) -> Result<()> {
  let node = range.start.node;
  let text = doc.text(node).ok_or(Error::NotText(node))?.to_owned();
  let start = range.start.offset;
  let end = if range.is_single_node() {
    range.end.offset
  } else {
    text.len()
  };
  if end < start || end > text.len() || !text.is_char_boundary(start) || !text.is_char_boundary(end)
  {
    return Err(Error::InvalidOffset {
      node,
      offset: start,
    });
  }
  let parent = doc.parent(node).ok_or(Error::Detached(node))?;

  let middle = doc.create_text(&text[start..end]);
  doc.append_child(marker, middle)?;
  if start > 0 {
    let before = doc.create_text(&text[..start]);
    doc.insert_before(parent, before, Some(node))?;
  }
  doc.insert_before(parent, marker, Some(node))?;
  if end < text.len() {
    let after = doc.create_text(&text[end..]);
    doc.insert_before(parent, after, Some(node))?;
  }
  doc.remove_node(node)
}

/// Deliver a click on `node` to the nearest marker or indicator above it.
pub fn click(doc: &Document, node: NodeId) -> Option<MarkerAction> {
  let action = doc.dispatch_click(node);
  if let Some(action) = &action {
    tracing::debug!(?action, ?node, "marker clicked");
  }
  action
}

/// Remove the marker for `highlight_id`, putting its text back in place.
/// Returns whether a marker was found.
pub fn detach(doc: &mut Document, highlight_id: &str) -> Result<bool> {
  let Some(marker) = find_marker(doc, highlight_id) else {
    return Ok(false);
  };
  for indicator in doc.find_elements(|e| is_marker_for(e, INDICATOR_CLASS, highlight_id)) {
    doc.remove_node(indicator)?;
  }

  let mut parent = doc.parent(marker).ok_or(Error::Detached(marker))?;
  doc.unwrap_element(marker)?;
  if doc
    .element(parent)
    .is_some_and(|e| is_marker_for(e, WRAPPER_CLASS, highlight_id))
  {
    let wrapper = parent;
    parent = doc.parent(wrapper).ok_or(Error::Detached(wrapper))?;
    doc.unwrap_element(wrapper)?;
  }
  doc.normalize(parent);
  Ok(true)
}

/// Repaint the marker for `highlight_id`. Returns whether one was found.
pub fn recolor(doc: &mut Document, highlight_id: &str, color: Color) -> Result<bool> {
  let Some(marker) = find_marker(doc, highlight_id) else {
    return Ok(false);
  };
  doc.set_attr(marker, COLOR_ATTR, color.as_ref())?;
  doc.set_attr(marker, "style", &marker_style(color))?;
  Ok(true)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeDelta, Utc};
  use margin_core::record::NewHighlight;

  use super::*;

  const PAGE: &str = "https://chat.test/app/1";

  fn highlight(text: &str, comment: Option<&str>) -> Highlight {
    let mut new = NewHighlight::new(text, PAGE).with_color(Color::Green);
    if let Some(c) = comment {
      new = new.with_comment(c);
    }
    new.build(Utc::now(), TimeDelta::days(7))
  }

  fn paragraph(tag: &str, text: &str) -> (Document, NodeId, NodeId) {
    let mut doc = Document::default();
    let el = doc.create_element(tag);
    let t = doc.create_text(text);
    doc.append_child(doc.root(), el).unwrap();
    doc.append_child(el, t).unwrap();
    (doc, el, t)
  }

  #[test]
  fn attach_wraps_text_and_adds_indicator() {
    let (mut doc, p, t) = paragraph("p", "one two three");
    let h = highlight("two", None);
    let marker = attach(&mut doc, &TextRange::within(t, 4..7), &h).unwrap();

    let el = doc.element(marker).unwrap();
    assert_eq!(el.attr(ID_ATTR), Some(h.id.as_str()));
    assert_eq!(el.attr(COLOR_ATTR), Some("green"));
    assert_eq!(doc.text_content(marker), "two");
    assert_eq!(doc.text_content(p), "one two··· three");
    assert_eq!(find_marker(&doc, &h.id), Some(marker));
    assert_eq!(click(&doc, doc.children(marker)[0]), Some(MarkerAction::OpenDetails {
      highlight_id: h.id.clone(),
    }));
  }

  #[test]
  fn commented_indicator_shows_the_comment() {
    let (mut doc, p, t) = paragraph("p", "one two three");
    let h = highlight("two", Some("remember this"));
    let marker = attach(&mut doc, &TextRange::within(t, 4..7), &h).unwrap();
    let indicator = doc.next_sibling(marker).unwrap();
    assert_eq!(doc.text_content(indicator), "💬");
    assert!(matches!(
      click(&doc, indicator),
      Some(MarkerAction::ShowComment { comment, .. }) if comment == "remember this"
    ));
    assert_eq!(doc.element(indicator).unwrap().attr("title"), Some("remember this"));
    assert!(doc.text_content(p).starts_with("one two💬"));
  }

  #[test]
  fn list_items_get_a_nowrap_wrapper() {
    let (mut doc, li, t) = paragraph("li", "first item text");
    let h = highlight("item", None);
    let marker = attach(&mut doc, &TextRange::within(t, 6..10), &h).unwrap();
    let wrapper = doc.parent(marker).unwrap();
    assert!(doc.has_class(wrapper, WRAPPER_CLASS));
    assert_eq!(doc.parent(wrapper), Some(li));
    assert_eq!(doc.children(wrapper).len(), 2);
  }

  #[test]
  fn cross_node_ranges_fall_back_to_a_manual_split() {
    let (mut doc, p, t) = paragraph("p", "start of text");
    let b = doc.create_element("b");
    let bold = doc.create_text("bold");
    doc.append_child(b, bold).unwrap();
    doc.append_child(p, b).unwrap();

    let h = highlight("of text bold", None);
    let range = TextRange::new(
      crate::Boundary { node: t, offset: 6 },
      crate::Boundary {
        node:   bold,
        offset: 4,
      },
    );
    let marker = attach(&mut doc, &range, &h).unwrap();
    assert_eq!(doc.text_content(marker), "of text");
    assert!(!doc.is_connected(t));
    assert_eq!(doc.text_content(p), "start of text···bold");
  }

  #[test]
  fn detach_restores_the_original_text() {
    for tag in ["p", "li"] {
      let (mut doc, el, t) = paragraph(tag, "one two three");
      let h = highlight("two", Some("note"));
      attach(&mut doc, &TextRange::within(t, 4..7), &h).unwrap();

      assert!(detach(&mut doc, &h.id).unwrap());
      assert_eq!(doc.node_html(el), format!("<{tag}>one two three</{tag}>"));
      assert_eq!(doc.children(el).len(), 1);
      assert!(!detach(&mut doc, &h.id).unwrap());
    }
  }

  #[test]
  fn recolor_updates_attribute_and_style() {
    let (mut doc, _, t) = paragraph("p", "one two three");
    let h = highlight("two", None);
    let marker = attach(&mut doc, &TextRange::within(t, 4..7), &h).unwrap();
    assert!(recolor(&mut doc, &h.id, Color::Pink).unwrap());
    let el = doc.element(marker).unwrap();
    assert_eq!(el.attr(COLOR_ATTR), Some("pink"));
    assert!(el.attr("style").unwrap().contains("233, 30, 99"));
    assert!(!recolor(&mut doc, "missing", Color::Pink).unwrap());
  }
}
