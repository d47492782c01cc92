//! Text ranges over a [`Document`].

use std::ops::Range;

use crate::{Document, Error, NodeId, Result};

/// A position inside a text node, as a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
  pub node:   NodeId,
  pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
  pub start: Boundary,
  pub end:   Boundary,
}

impl TextRange {
  pub fn new(start: Boundary, end: Boundary) -> Self { Self { start, end } }

  /// The byte range `bytes` inside a single text node.
  pub fn within(node: NodeId, bytes: Range<usize>) -> Self {
    Self {
      start: Boundary {
        node,
        offset: bytes.start,
      },
      end:   Boundary {
        node,
        offset: bytes.end,
      },
    }
  }

  pub fn is_single_node(&self) -> bool { self.start.node == self.end.node }

  /// Text covered by the range. Multi-node ranges concatenate every text node
  /// between the two ends in document order.
  pub fn text(&self, doc: &Document) -> Result<String> {
    let start = doc.text(self.start.node).ok_or(Error::NotText(self.start.node))?;
    check_offset(start, self.start)?;

    if self.is_single_node() {
      check_offset(start, self.end)?;
      if self.end.offset < self.start.offset {
        return Err(Error::InvalidOffset {
          node:   self.end.node,
          offset: self.end.offset,
        });
      }
      return Ok(start[self.start.offset..self.end.offset].to_owned());
    }

    let end = doc.text(self.end.node).ok_or(Error::NotText(self.end.node))?;
    check_offset(end, self.end)?;

    let order = doc.text_nodes(doc.root());
    let pos = |n: NodeId| order.iter().position(|x| *x == n);
    let (Some(from), Some(to)) = (pos(self.start.node), pos(self.end.node)) else {
      return Err(Error::Detached(self.start.node));
    };
    if to < from {
      return Err(Error::BoundaryCrossing);
    }

    let mut out = start[self.start.offset..].to_owned();
    for node in &order[from + 1..to] {
      out.push_str(doc.text(*node).unwrap_or_default());
    }
    out.push_str(&end[..self.end.offset]);
    Ok(out)
  }

  /// Wrap the covered text in `wrapper`, splitting the text node as needed.
  ///
  /// Only ranges inside one text node can be wrapped; anything else fails
  /// with [`Error::BoundaryCrossing`] and leaves the document untouched.
  pub fn surround_contents(&self, doc: &mut Document, wrapper: NodeId) -> Result<()> {
    if !self.is_single_node() {
      return Err(Error::BoundaryCrossing);
    }
    let node = self.start.node;
    let text = doc.text(node).ok_or(Error::NotText(node))?;
    check_offset(text, self.start)?;
    check_offset(text, self.end)?;
    if self.end.offset < self.start.offset {
      return Err(Error::InvalidOffset {
        node,
        offset: self.end.offset,
      });
    }
    if doc.element(wrapper).is_none() {
      return Err(Error::NotElement(wrapper));
    }
    let len = text.len();
    let parent = doc.parent(node).ok_or(Error::Detached(node))?;

    // Split the tail first so the start offset stays valid.
    if self.end.offset < len {
      doc.split_text(node, self.end.offset)?;
    }
    let middle = if self.start.offset > 0 {
      doc.split_text(node, self.start.offset)?
    } else {
      node
    };
    doc.insert_before(parent, wrapper, Some(middle))?;
    doc.append_child(wrapper, middle)
  }
}

fn check_offset(text: &str, at: Boundary) -> Result<()> {
  if at.offset > text.len() || !text.is_char_boundary(at.offset) {
    return Err(Error::InvalidOffset {
      node:   at.node,
      offset: at.offset,
    });
  }
  Ok(())
}
