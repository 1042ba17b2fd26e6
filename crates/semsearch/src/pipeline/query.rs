use std::sync::Arc;

use super::check_dimension;
use crate::embedding::Embedder;
use crate::error::{Result, SearchError};
use crate::model::{CollectionSchema, IndexParams, SearchResult};
use crate::store::{QueryRequest, VectorStore};

/// Single semantic lookup: embed the query, ask the store, rank the answer
pub struct QueryPipeline {
  embedder: Arc<dyn Embedder>,
  store: Arc<dyn VectorStore>,
  schema: CollectionSchema,
  output_fields: Vec<String>,
  index: IndexParams,
  default_top_k: usize,
}

impl QueryPipeline {
  pub fn new(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    schema: CollectionSchema,
    index: IndexParams,
    default_top_k: usize,
  ) -> Result<Self> {
    check_dimension(embedder.model_name(), embedder.dimension(), &schema)?;
    let output_fields = schema.metadata_field_names();
    Ok(Self { embedder, store, schema, output_fields, index, default_top_k })
  }

  pub fn default_top_k(&self) -> usize {
    self.default_top_k
  }

  pub async fn search_default(&self, query: &str) -> Result<Vec<SearchResult>> {
    self.search(query, self.default_top_k).await
  }

  /// At most `top_k` results, best first, in exactly the order the store returned them
  pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
      return Err(SearchError::invalid_argument("query text must not be empty"));
    }
    if top_k == 0 {
      return Err(SearchError::invalid_argument("top_k must be greater than zero"));
    }

    let vector = self.embedder.encode(query).await?;
    let request = QueryRequest {
      vector: &vector,
      top_k,
      id_field: &self.schema.id_field,
      vector_field: &self.schema.vector_field,
      output_fields: &self.output_fields,
      metric: self.schema.metric,
      params: &self.index,
    };

    let matches = self.store.query(&self.schema.name, &request).await?;
    tracing::debug!(collection = %self.schema.name, top_k, hits = matches.len(), "query answered");

    Ok(
      matches
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(i, hit)| SearchResult {
          rank: i + 1,
          record_id: hit.id,
          metadata: hit.metadata,
          score: hit.score,
          metric: self.schema.metric,
        })
        .collect(),
    )
  }
}
