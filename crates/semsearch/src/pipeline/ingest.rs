//! One-time population of a collection
//!
//! The store is populated only while it is empty. The guard is a plain
//! count-then-insert and is not atomic: two ingesters starting together can
//! both see zero. Writes are upserts, so the overlap rewrites the same ids
//! instead of duplicating them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::check_dimension;
use crate::embedding::Embedder;
use crate::error::{Result, SearchError};
use crate::model::{CollectionSchema, EmbeddedRecord, IndexParams, Record};
use crate::store::VectorStore;

const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestReport {
  /// The collection was empty and now holds `inserted` records
  Populated { inserted: usize },
  /// The collection already held data; nothing was embedded or written
  AlreadyPopulated { existing: u64 },
}

impl fmt::Display for IngestReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IngestReport::Populated { inserted } => write!(f, "inserted {inserted} records"),
      IngestReport::AlreadyPopulated { existing } => {
        write!(f, "already populated with {existing} records, skipped")
      }
    }
  }
}

pub struct IngestPipeline {
  embedder: Arc<dyn Embedder>,
  store: Arc<dyn VectorStore>,
  schema: CollectionSchema,
  index: IndexParams,
  batch_size: usize,
  content_hash_ids: bool,
}

impl IngestPipeline {
  pub fn new(
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    schema: CollectionSchema,
  ) -> Result<Self> {
    check_dimension(embedder.model_name(), embedder.dimension(), &schema)?;
    Ok(Self {
      embedder,
      store,
      schema,
      index: IndexParams::default(),
      batch_size: DEFAULT_BATCH_SIZE,
      content_hash_ids: false,
    })
  }

  pub fn with_index_params(mut self, index: IndexParams) -> Self {
    self.index = index;
    self
  }

  /// Records per insert call; zero is treated as one
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  /// Replace every record id with a hash of its text and metadata before writing
  pub fn with_content_hash_ids(mut self, enabled: bool) -> Self {
    self.content_hash_ids = enabled;
    self
  }

  /// Ensure the collection, populate it if empty, then make it queryable
  pub async fn ingest(&self, records: Vec<Record>) -> Result<IngestReport> {
    self.ensure_collection().await?;

    let existing = self.store.count(&self.schema.name).await?;
    let report = if existing > 0 {
      bentley::info!(
        "Collection '{}' already holds {} entities, skipping population",
        self.schema.name,
        existing
      );
      IngestReport::AlreadyPopulated { existing }
    } else {
      self.populate(records).await?
    };

    self.ensure_index_and_load().await?;
    Ok(report)
  }

  /// Embed and write `records` regardless of what the collection holds
  pub async fn reingest(&self, records: Vec<Record>) -> Result<IngestReport> {
    self.ensure_collection().await?;
    let report = self.populate(records).await?;
    self.ensure_index_and_load().await?;
    Ok(report)
  }

  async fn ensure_collection(&self) -> Result<()> {
    let name = &self.schema.name;
    match self.store.describe_collection(name).await? {
      Some(info) => {
        self.schema.check_compatible(&info)?;
        bentley::verbose!("Collection '{}' exists", name);
      }
      None => {
        bentley::info!(
          "Creating collection '{}' ({} dims, {})",
          name,
          self.schema.dimension,
          self.schema.metric
        );
        self.store.create_collection(&self.schema).await?;
      }
    }
    Ok(())
  }

  async fn populate(&self, records: Vec<Record>) -> Result<IngestReport> {
    let records: Vec<Record> = if self.content_hash_ids {
      records.into_iter().map(|record| Record { id: record.content_id(), ..record }).collect()
    } else {
      records
    };
    let records = distinct_ids(records);

    if records.is_empty() {
      bentley::warn!("Corpus is empty, nothing to insert");
      return Ok(IngestReport::Populated { inserted: 0 });
    }

    bentley::info!("Embedding {} records with {}...", records.len(), self.embedder.model_name());
    let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
    let vectors = self.embedder.encode_batch(&texts).await?;
    if vectors.len() != records.len() {
      return Err(SearchError::upstream_rejected(
        self.embedder.model_name(),
        format!("embedded {} texts into {} vectors", records.len(), vectors.len()),
      ));
    }

    let embedded = records
      .into_iter()
      .zip(vectors)
      .map(|(record, vector)| EmbeddedRecord::new(record, vector, self.schema.dimension))
      .collect::<Result<Vec<_>>>()?;

    for (i, chunk) in embedded.chunks(self.batch_size).enumerate() {
      tracing::debug!(collection = %self.schema.name, chunk = i, size = chunk.len(), "inserting");
      self.store.insert(&self.schema, chunk).await?;
    }
    self.store.flush(&self.schema.name).await?;

    bentley::success!("Inserted {} records into '{}'", embedded.len(), self.schema.name);
    Ok(IngestReport::Populated { inserted: embedded.len() })
  }

  async fn ensure_index_and_load(&self) -> Result<()> {
    let name = &self.schema.name;
    let field = &self.schema.vector_field;

    if !self.store.has_index(name, field).await? {
      bentley::verbose!("Creating {} index on '{}'", self.index.index_type, field);
      self.store.create_index(name, field, self.schema.metric, &self.index).await?;
    }
    self.store.load(name).await
  }
}

/// Keep the first record for each id; later ones would overwrite it in the store
fn distinct_ids(records: Vec<Record>) -> Vec<Record> {
  let total = records.len();
  let mut seen = HashSet::new();
  let unique: Vec<Record> =
    records.into_iter().filter(|record| seen.insert(record.id.clone())).collect();

  if unique.len() < total {
    bentley::warn!("Skipping {} records with duplicate ids", total - unique.len());
  }
  unique
}
