//! semsearch - a minimal semantic-search pipeline
//!
//! Embed a corpus once, keep it in a vector database, and answer free-text
//! queries with the nearest stored records.
//!
//! ```text
//! ensure collection -> embed corpus (once) -> upsert -> index + load
//! embed query -> top-k nearest -> render
//! ```

pub mod commands;
pub mod config;
pub mod corpus;
pub mod demo;
pub mod display;
pub mod embedding;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod store;

pub use error::{Result, SearchError};
