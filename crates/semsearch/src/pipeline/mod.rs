//! Ingestion and query pipelines over an [`Embedder`](crate::embedding::Embedder)
//! and a [`VectorStore`](crate::store::VectorStore)

pub mod ingest;
pub mod query;

pub use ingest::{IngestPipeline, IngestReport};
pub use query::QueryPipeline;

use crate::error::{Result, SearchError};
use crate::model::CollectionSchema;

/// Both pipelines must agree with the embedder on vector length
fn check_dimension(model: &str, produced: usize, schema: &CollectionSchema) -> Result<()> {
  if produced != schema.dimension {
    return Err(SearchError::configuration(format!(
      "embedder '{model}' produces {produced}-dimensional vectors \
       but collection '{}' is declared with {}",
      schema.name, schema.dimension
    )));
  }
  Ok(())
}
