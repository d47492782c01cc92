//! Anchoring of highlights in chat pages.
//!
//! Pages are modelled by [`Document`], a `scraper` tree edited in place that
//! can be built from saved HTML ([`Document::parse_html`]) or a JSON description
//! ([`Document::from_json`]). [`RestoreEngine`] finds stored highlight text
//! inside the page's response regions and wraps it in markers;
//! [`RestoreScheduler`] repeats that as the page fills in.

pub mod dom;
pub mod engine;
pub mod error;
pub mod html;
pub mod marker;
pub mod range;
pub mod schedule;

pub use dom::{Document, NodeId, NodeSpec, parse_selector};
pub use engine::{Anchor, AnchorKind, RestoreEngine, RestoreReport};
pub use error::{Error, Result};
pub use marker::MarkerAction;
pub use range::{Boundary, TextRange};
pub use schedule::{PassRecord, RestoreScheduler, RetryPolicy, Trigger};

#[cfg(test)]
mod tests;
