//! Vector store abstraction layer
//!
//! The pipelines only talk to [`VectorStore`]; the adapters below map it onto
//! a concrete service. All indexing and similarity math for the remote
//! backends happens inside the service itself.

pub mod memory;
pub mod milvus;
pub mod pinecone;
pub mod retry;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Backend, Config};
use crate::error::Result;
use crate::model::{
  CollectionInfo, CollectionSchema, EmbeddedRecord, IndexParams, Metric, StoredMatch,
};

pub use memory::MemoryStore;
pub use milvus::MilvusStore;
pub use pinecone::PineconeStore;
pub use retry::RetryPolicy;

/// Everything a store needs to answer one nearest-neighbour query
#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
  pub vector: &'a [f32],
  pub top_k: usize,
  pub id_field: &'a str,
  pub vector_field: &'a str,
  pub output_fields: &'a [String],
  pub metric: Metric,
  pub params: &'a IndexParams,
}

/// Collection lifecycle and data operations of a vector database
#[async_trait]
pub trait VectorStore: Send + Sync {
  /// Service name used in logs and error messages
  fn service(&self) -> &str;

  async fn has_collection(&self, name: &str) -> Result<bool>;

  /// Dimension and metric of an existing collection, `None` if it does not exist
  async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

  async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

  /// Number of entities currently visible in the collection
  async fn count(&self, name: &str) -> Result<u64>;

  /// Write records with upsert semantics: an existing id is replaced, never duplicated
  async fn insert(&self, schema: &CollectionSchema, records: &[EmbeddedRecord]) -> Result<()>;

  /// Make previous inserts visible to `count` and `query`
  async fn flush(&self, name: &str) -> Result<()>;

  async fn has_index(&self, name: &str, field: &str) -> Result<bool>;

  async fn create_index(
    &self,
    name: &str,
    field: &str,
    metric: Metric,
    params: &IndexParams,
  ) -> Result<()>;

  /// Bring the collection into a queryable state
  async fn load(&self, name: &str) -> Result<()>;

  /// Nearest neighbours, best first, at most `top_k`
  async fn query(&self, name: &str, request: &QueryRequest<'_>) -> Result<Vec<StoredMatch>>;
}

/// Decorator that retries the read-only operations of an inner store.
///
/// Writes (`create_collection`, `insert`, `flush`, `create_index`, `load`)
/// are passed through exactly once.
pub struct RetryingStore {
  inner: Arc<dyn VectorStore>,
  policy: RetryPolicy,
}

impl RetryingStore {
  pub fn new(inner: Arc<dyn VectorStore>, policy: RetryPolicy) -> Self {
    Self { inner, policy }
  }
}

#[async_trait]
impl VectorStore for RetryingStore {
  fn service(&self) -> &str {
    self.inner.service()
  }

  async fn has_collection(&self, name: &str) -> Result<bool> {
    self.policy.run("has_collection", || self.inner.has_collection(name)).await
  }

  async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
    self.policy.run("describe_collection", || self.inner.describe_collection(name)).await
  }

  async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
    self.inner.create_collection(schema).await
  }

  async fn count(&self, name: &str) -> Result<u64> {
    self.policy.run("count", || self.inner.count(name)).await
  }

  async fn insert(&self, schema: &CollectionSchema, records: &[EmbeddedRecord]) -> Result<()> {
    self.inner.insert(schema, records).await
  }

  async fn flush(&self, name: &str) -> Result<()> {
    self.inner.flush(name).await
  }

  async fn has_index(&self, name: &str, field: &str) -> Result<bool> {
    self.policy.run("has_index", || self.inner.has_index(name, field)).await
  }

  async fn create_index(
    &self,
    name: &str,
    field: &str,
    metric: Metric,
    params: &IndexParams,
  ) -> Result<()> {
    self.inner.create_index(name, field, metric, params).await
  }

  async fn load(&self, name: &str) -> Result<()> {
    self.inner.load(name).await
  }

  async fn query(&self, name: &str, request: &QueryRequest<'_>) -> Result<Vec<StoredMatch>> {
    self.policy.run("query", || self.inner.query(name, request)).await
  }
}

/// Build the configured store, wrapped with the configured retry policy
pub fn connect(config: &Config) -> Result<Arc<dyn VectorStore>> {
  let inner: Arc<dyn VectorStore> = match config.backend {
    Backend::Milvus => Arc::new(MilvusStore::new(
      &config.endpoint,
      config.api_key.clone(),
      config.request_timeout(),
    )?),
    Backend::Pinecone => Arc::new(PineconeStore::new(
      &config.endpoint,
      config.api_key.clone().unwrap_or_default(),
      config.pinecone.clone(),
      config.request_timeout(),
      config.ready_timeout(),
    )?),
    Backend::Memory => Arc::new(MemoryStore::new()),
  };

  bentley::verbose!("Using {} vector store at {}", inner.service(), config.endpoint);
  Ok(Arc::new(RetryingStore::new(inner, config.retry_policy())))
}
