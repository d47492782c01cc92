//! Error type for `margin-anchor`.

use ego_tree::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The node is not connected to the document root.
  #[error("node {0:?} is detached from the document")]
  Detached(NodeId),

  /// A range whose ends sit in different text nodes cannot be wrapped in one
  /// element without splitting the structure in between.
  #[error("range crosses a node boundary")]
  BoundaryCrossing,

  #[error("node {0:?} does not belong to this document")]
  UnknownNode(NodeId),

  #[error("node {0:?} is not a text node")]
  NotText(NodeId),

  #[error("node {0:?} is not an element")]
  NotElement(NodeId),

  #[error("node {child:?} is not a child of {parent:?}")]
  NotAChild { parent: NodeId, child: NodeId },

  #[error("offset {offset} is not a character boundary inside node {node:?}")]
  InvalidOffset { node: NodeId, offset: usize },

  #[error("invalid selector {selector:?}: {reason}")]
  Selector { selector: String, reason: String },

  #[error("invalid document: {0}")]
  InvalidDocument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
