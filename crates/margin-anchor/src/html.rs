//! Import a saved HTML page into a [`Document`].

use scraper::Html;

use crate::{Document, Error, Result};

impl Document {
  /// Parse `source` as a full HTML document. The `<html>` element becomes
  /// the root; comments and doctypes are dropped.
  pub fn parse_html(source: &str) -> Result<Self> {
    let html = Html::parse_document(source);
    let root = html
      .tree
      .root()
      .children()
      .find(|n| n.value().is_element())
      .map(|n| n.id())
      .ok_or_else(|| Error::InvalidDocument("page has no root element".to_owned()))?;

    let doc = Self::adopt(html, root);
    tracing::debug!(nodes = doc.descendants(root).len(), "imported html page");
    Ok(doc)
  }
}
