//! The page model: a [`scraper::Html`] tree that is edited in place.
//!
//! Nodes are never freed: removing a node only detaches it, so a [`NodeId`]
//! stays valid for the lifetime of its [`Document`]. Every mutation that
//! touches the connected tree bumps [`Document::revision`] and inserted
//! subtrees are logged for [`Document::take_added`], which is how callers
//! observe content changes.

use std::collections::{BTreeMap, HashMap};

pub use ego_tree::NodeId;
use ego_tree::{NodeMut, NodeRef};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::{
  CaseSensitivity, ElementRef, Html, Node, Selector,
  node::{Element, Text},
};
use serde::Deserialize;

use crate::{Error, Result, marker::MarkerAction};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Parse a CSS selector, keeping its source in the error.
pub fn parse_selector(source: &str) -> Result<Selector> {
  Selector::parse(source).map_err(|e| Error::Selector {
    selector: source.to_owned(),
    reason:   e.to_string(),
  })
}

fn html_name(tag: &str) -> QualName {
  QualName::new(
    None,
    Namespace::from(HTML_NAMESPACE),
    LocalName::from(tag.to_ascii_lowercase()),
  )
}

fn build_element(name: QualName, attrs: Vec<(String, String)>) -> Element {
  let attrs = attrs
    .into_iter()
    .map(|(name, value)| Attribute {
      name:  QualName::new(None, Namespace::from(""), LocalName::from(name)),
      value: value.as_str().into(),
    })
    .collect();
  Element::new(name, attrs)
}

// ─── Document ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Document {
  html:      Html,
  root:      NodeId,
  /// Click handlers by element.
  listeners: HashMap<NodeId, MarkerAction>,
  revision:  u64,
  added:     Vec<NodeId>,
}

impl Default for Document {
  fn default() -> Self { Self::new("body") }
}

impl Document {
  /// An empty document whose root element is `root_tag`.
  pub fn new(root_tag: &str) -> Self {
    let mut html = Html::new_document();
    let root = html
      .tree
      .root_mut()
      .append(Node::Element(build_element(html_name(root_tag), Vec::new())))
      .id();
    Self::adopt(html, root)
  }

  /// Wrap a parsed page whose root element is `root`. Comments and other
  /// non-content nodes below the root are detached.
  pub(crate) fn adopt(html: Html, root: NodeId) -> Self {
    let mut doc = Self {
      html,
      root,
      listeners: HashMap::new(),
      revision: 0,
      added: Vec::new(),
    };
    let stray: Vec<NodeId> = doc
      .node(root)
      .map(|n| {
        n.descendants()
          .filter(|d| !d.value().is_element() && !d.value().is_text())
          .map(|d| d.id())
          .collect()
      })
      .unwrap_or_default();
    for id in stray {
      doc.detach(id);
    }
    doc
  }

  pub fn root(&self) -> NodeId { self.root }

  /// Count of mutations applied to the connected tree.
  pub fn revision(&self) -> u64 { self.revision }

  /// Drain the log of nodes inserted into the connected tree.
  pub fn take_added(&mut self) -> Vec<NodeId> { std::mem::take(&mut self.added) }

  /// Forget the mutation history, e.g. once a document has been built.
  pub fn reset_tracking(&mut self) {
    self.revision = 0;
    self.added.clear();
  }

  fn node(&self, id: NodeId) -> Option<NodeRef<'_, Node>> { self.html.tree.get(id) }

  fn node_mut(&mut self, id: NodeId) -> Result<NodeMut<'_, Node>> {
    self.html.tree.get_mut(id).ok_or(Error::UnknownNode(id))
  }

  /// A new, unattached element.
  pub fn create_element(&mut self, tag: &str) -> NodeId {
    let element = build_element(html_name(tag), Vec::new());
    self.html.tree.orphan(Node::Element(element)).id()
  }

  /// A new, unattached text node.
  pub fn create_text(&mut self, text: &str) -> NodeId {
    self.html.tree.orphan(Node::Text(Text { text: text.into() })).id()
  }

  // ─── Inspection ────────────────────────────────────────────────────────────

  pub fn element(&self, id: NodeId) -> Option<&Element> { self.node(id)?.value().as_element() }

  pub fn text(&self, id: NodeId) -> Option<&str> {
    self.node(id)?.value().as_text().map(|t| &*t.text)
  }

  /// Lowercase tag name of element `id`.
  pub fn tag(&self, id: NodeId) -> Option<&str> { self.element(id).map(Element::name) }

  pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> { self.element(id)?.attr(name) }

  pub fn has_class(&self, id: NodeId, class: &str) -> bool {
    self
      .element(id)
      .is_some_and(|e| e.has_class(class, CaseSensitivity::CaseSensitive))
  }

  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    if id == self.root {
      return None;
    }
    self.node(id)?.parent().map(|p| p.id())
  }

  pub fn children(&self, id: NodeId) -> Vec<NodeId> {
    self
      .node(id)
      .map(|n| n.children().map(|c| c.id()).collect())
      .unwrap_or_default()
  }

  pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
    if id == self.root {
      return None;
    }
    self.node(id)?.next_sibling().map(|n| n.id())
  }

  /// Parent, grandparent, ... up to the root.
  pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    std::iter::successors(self.parent(id), |n| self.parent(*n))
  }

  pub fn is_connected(&self, id: NodeId) -> bool {
    id == self.root || self.ancestors(id).any(|a| a == self.root)
  }

  /// `id` and everything below it, in document order.
  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    self
      .node(id)
      .map(|n| n.descendants().map(|d| d.id()).collect())
      .unwrap_or_default()
  }

  /// Text nodes below `id`, in document order.
  pub fn text_nodes(&self, id: NodeId) -> Vec<NodeId> {
    self
      .descendants(id)
      .into_iter()
      .filter(|n| self.text(*n).is_some())
      .collect()
  }

  pub fn text_content(&self, id: NodeId) -> String {
    self
      .text_nodes(id)
      .into_iter()
      .filter_map(|n| self.text(n))
      .collect()
  }

  pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
    self
      .node(id)
      .and_then(ElementRef::wrap)
      .is_some_and(|e| selector.matches(&e))
  }

  /// The nearest element at or above `id` matching `selector`.
  pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
    std::iter::once(id)
      .chain(self.ancestors(id))
      .find(|n| self.matches(*n, selector))
  }

  /// Elements strictly below `id` matching `selector`, in document order.
  pub fn query_all(&self, id: NodeId, selector: &Selector) -> Vec<NodeId> {
    self
      .descendants(id)
      .into_iter()
      .skip(1)
      .filter(|n| self.matches(*n, selector))
      .collect()
  }

  /// Connected elements satisfying `pred`, in document order.
  pub fn find_elements(&self, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
    self
      .descendants(self.root)
      .into_iter()
      .filter(|n| self.element(*n).is_some_and(&pred))
      .collect()
  }

  /// Whether `a` comes before `b` in document order. Both must be connected.
  pub fn precedes(&self, a: NodeId, b: NodeId) -> bool {
    let order = self.descendants(self.root);
    let pos = |n: NodeId| order.iter().position(|x| *x == n);
    matches!((pos(a), pos(b)), (Some(x), Some(y)) if x < y)
  }

  /// Run the click handler of `id` or its nearest ancestor that has one.
  pub fn dispatch_click(&self, id: NodeId) -> Option<MarkerAction> {
    std::iter::once(id)
      .chain(self.ancestors(id))
      .find_map(|n| self.listeners.get(&n).cloned())
  }

  // ─── Mutation ──────────────────────────────────────────────────────────────

  fn touch(&mut self, id: NodeId) {
    if self.is_connected(id) {
      self.revision += 1;
    }
  }

  fn detach(&mut self, id: NodeId) {
    if let Some(mut node) = self.html.tree.get_mut(id) {
      node.detach();
    }
  }

  fn write_text(&mut self, id: NodeId, text: &str) {
    if let Some(mut node) = self.html.tree.get_mut(id)
      && let Node::Text(t) = node.value()
    {
      t.text = text.into();
    }
  }

  /// Set an attribute. The element is rebuilt so its cached class list
  /// follows the new value.
  pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
    let element = self.element(id).ok_or(Error::NotElement(id))?;
    let name = name.to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = element
      .attrs()
      .map(|(k, v)| (k.to_owned(), v.to_owned()))
      .collect();
    match attrs.iter_mut().find(|(k, _)| *k == name) {
      Some((_, v)) => *v = value.to_owned(),
      None => attrs.push((name, value.to_owned())),
    }
    let rebuilt = build_element(element.name.clone(), attrs);

    *self.node_mut(id)?.value() = Node::Element(rebuilt);
    self.touch(id);
    Ok(())
  }

  pub fn set_listener(&mut self, id: NodeId, action: MarkerAction) -> Result<()> {
    if self.element(id).is_none() {
      return Err(Error::NotElement(id));
    }
    self.listeners.insert(id, action);
    Ok(())
  }

  pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
    if self.text(id).is_none() {
      return Err(Error::NotText(id));
    }
    self.write_text(id, text);
    self.touch(id);
    Ok(())
  }

  pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
    self.insert_before(parent, child, None)
  }

  /// Insert `child` under `parent` before `reference` (at the end when
  /// `None`), moving it out of its current position first.
  pub fn insert_before(
    &mut self,
    parent: NodeId,
    child: NodeId,
    reference: Option<NodeId>,
  ) -> Result<()> {
    if self.element(parent).is_none() {
      return Err(Error::NotElement(parent));
    }
    if self.node(child).is_none() {
      return Err(Error::UnknownNode(child));
    }
    if child == self.root {
      return Err(Error::InvalidDocument("the root cannot be moved".to_owned()));
    }
    if child == parent || self.ancestors(parent).any(|a| a == child) {
      return Err(Error::InvalidDocument(format!(
        "{child:?} cannot be inserted inside itself"
      )));
    }

    match reference {
      Some(r) => {
        if self.parent(r) != Some(parent) {
          return Err(Error::NotAChild { parent, child: r });
        }
        if r == child {
          return Ok(());
        }
        self.detach(child);
        self.node_mut(r)?.insert_id_before(child);
      }
      None => {
        self.detach(child);
        self.node_mut(parent)?.append_id(child);
      }
    }

    if self.is_connected(parent) {
      self.revision += 1;
      self.added.push(child);
    }
    Ok(())
  }

  /// Detach `id` from its parent. The root cannot be removed.
  pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
    if id == self.root {
      return Err(Error::InvalidDocument("the root cannot be removed".to_owned()));
    }
    if self.node(id).is_none() {
      return Err(Error::UnknownNode(id));
    }
    let connected = self.is_connected(id);
    self.detach(id);
    if connected {
      self.revision += 1;
    }
    Ok(())
  }

  pub fn replace_with(&mut self, old: NodeId, new: NodeId) -> Result<()> {
    let parent = self.parent(old).ok_or(Error::Detached(old))?;
    self.insert_before(parent, new, Some(old))?;
    self.remove_node(old)
  }

  /// Replace element `id` by its children.
  pub fn unwrap_element(&mut self, id: NodeId) -> Result<()> {
    let parent = self.parent(id).ok_or(Error::Detached(id))?;
    for child in self.children(id) {
      self.insert_before(parent, child, Some(id))?;
    }
    self.remove_node(id)
  }

  /// Split text node `id` at byte `offset`. `id` keeps the head; the tail
  /// becomes a new sibling right after it, which is returned.
  pub fn split_text(&mut self, id: NodeId, offset: usize) -> Result<NodeId> {
    let text = self.text(id).ok_or(Error::NotText(id))?;
    if offset > text.len() || !text.is_char_boundary(offset) {
      return Err(Error::InvalidOffset { node: id, offset });
    }
    let (head, tail) = (text[..offset].to_owned(), text[offset..].to_owned());
    self.set_text(id, &head)?;

    let new = self.create_text(&tail);
    if let Some(parent) = self.parent(id) {
      let next = self.next_sibling(id);
      self.insert_before(parent, new, next)?;
    }
    Ok(new)
  }

  /// Merge adjacent text nodes and drop empty ones below `id`.
  pub fn normalize(&mut self, id: NodeId) {
    for element in self.descendants(id) {
      if self.element(element).is_none() {
        continue;
      }
      let mut previous: Option<(NodeId, String)> = None;
      let mut changed = false;
      for child in self.children(element) {
        let Some(text) = self.text(child).map(str::to_owned) else {
          previous = None;
          continue;
        };
        if text.is_empty() {
          self.detach(child);
          changed = true;
        } else if let Some((head, merged)) = &mut previous {
          merged.push_str(&text);
          self.write_text(*head, merged.as_str());
          self.detach(child);
          changed = true;
        } else {
          previous = Some((child, text));
        }
      }
      if changed {
        self.touch(element);
      }
    }
  }

  // ─── Serialisation ─────────────────────────────────────────────────────────

  /// Build a document from its JSON description (see [`NodeSpec`]).
  pub fn from_json(source: &str) -> Result<Self> {
    let spec: DocumentSpec = serde_json::from_str(source)
      .map_err(|e| Error::InvalidDocument(e.to_string()))?;
    let (mut doc, children) = match spec {
      DocumentSpec::Root(NodeSpec::Element {
        tag,
        attrs,
        children,
      }) => {
        let mut doc = Self::new(&tag);
        let root = doc.root;
        for (k, v) in &attrs {
          doc.set_attr(root, k, v)?;
        }
        (doc, children)
      }
      DocumentSpec::Root(NodeSpec::Text(_)) => {
        return Err(Error::InvalidDocument(
          "the document root must be an element".to_owned(),
        ));
      }
      DocumentSpec::Body(children) => (Self::default(), children),
    };
    let root = doc.root;
    for child in &children {
      let id = doc.build(child)?;
      doc.append_child(root, id)?;
    }
    doc.reset_tracking();
    Ok(doc)
  }

  /// Create the (unattached) subtree described by `spec`.
  pub fn build(&mut self, spec: &NodeSpec) -> Result<NodeId> {
    match spec {
      NodeSpec::Text(text) => Ok(self.create_text(text)),
      NodeSpec::Element {
        tag,
        attrs,
        children,
      } => {
        let id = self.create_element(tag);
        for (k, v) in attrs {
          self.set_attr(id, k, v)?;
        }
        for child in children {
          let child = self.build(child)?;
          self.append_child(id, child)?;
        }
        Ok(id)
      }
    }
  }

  pub fn to_html(&self) -> String { self.node_html(self.root) }

  /// Outer HTML of element `id`; empty for any other node.
  pub fn node_html(&self, id: NodeId) -> String {
    self
      .node(id)
      .and_then(ElementRef::wrap)
      .map(|e| e.html())
      .unwrap_or_default()
  }
}

// ─── JSON description ────────────────────────────────────────────────────────

/// A node as written in a JSON document file: a bare string is a text node,
/// an object is an element.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
  Text(String),
  Element {
    tag:      String,
    #[serde(default)]
    attrs:    BTreeMap<String, String>,
    #[serde(default)]
    children: Vec<NodeSpec>,
  },
}

/// A whole document: either a list of `body` children or a root element.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentSpec {
  Body(Vec<NodeSpec>),
  Root(NodeSpec),
}
