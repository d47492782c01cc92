//! Core types and algorithms for the Margin annotation engine.
//!
//! This crate has no database, runtime or document-model
//! dependencies. It holds the content fingerprints, the text similarity
//! scorer, the fragment canonicalizer, the persisted record types and the
//! key-value transport trait that storage backends implement.

pub mod canonical;
pub mod config;
pub mod error;
pub mod identity;
pub mod kv;
pub mod record;
pub mod similarity;

pub use error::{Error, Result};
