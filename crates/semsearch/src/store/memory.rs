//! In-process vector store with exact search
//!
//! Mirrors the lifecycle of the remote stores (create, insert, flush, index,
//! load, query) closely enough that the pipelines behave identically against
//! it. Used for offline runs and tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{QueryRequest, VectorStore};
use crate::error::{Result, SearchError};
use crate::model::{
  CollectionInfo, CollectionSchema, EmbeddedRecord, IndexParams, Metadata, Metric, RecordId,
  StoredMatch,
};

const SERVICE: &str = "memory";

/// Observable state of one collection, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStats {
  pub entities: usize,
  pub flushes: usize,
  pub indexed_fields: BTreeSet<String>,
  pub loaded: bool,
}

struct MemoryCollection {
  schema: CollectionSchema,
  entries: Vec<EmbeddedRecord>,
  flushes: usize,
  indexed_fields: BTreeSet<String>,
  loaded: bool,
}

impl MemoryCollection {
  fn upsert(&mut self, record: EmbeddedRecord) {
    match self.entries.iter_mut().find(|existing| existing.id() == record.id()) {
      Some(existing) => *existing = record,
      None => self.entries.push(record),
    }
  }
}

#[derive(Default)]
pub struct MemoryStore {
  collections: Mutex<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of a collection's state, `None` if it does not exist
  pub fn stats(&self, name: &str) -> Option<MemoryStats> {
    let collections = self.collections.lock().ok()?;
    collections.get(name).map(|collection| MemoryStats {
      entities: collection.entries.len(),
      flushes: collection.flushes,
      indexed_fields: collection.indexed_fields.clone(),
      loaded: collection.loaded,
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryCollection>>> {
    self
      .collections
      .lock()
      .map_err(|_| SearchError::upstream_unavailable(SERVICE, "store lock poisoned"))
  }
}

fn collection_mut<'a>(
  collections: &'a mut HashMap<String, MemoryCollection>,
  name: &str,
) -> Result<&'a mut MemoryCollection> {
  collections.get_mut(name).ok_or_else(|| SearchError::collection_not_found(name))
}

/// Euclidean distance
fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Cosine similarity; zero vectors are dissimilar to everything
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }
  dot / (norm_a * norm_b)
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
  match metric {
    Metric::L2 => l2_distance(a, b),
    Metric::Cosine => cosine_similarity(a, b),
  }
}

fn project(metadata: &Metadata, fields: &[String]) -> Metadata {
  fields
    .iter()
    .filter_map(|field| metadata.get(field).map(|value| (field.clone(), value.clone())))
    .collect()
}

#[async_trait]
impl VectorStore for MemoryStore {
  fn service(&self) -> &str {
    SERVICE
  }

  async fn has_collection(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.contains_key(name))
  }

  async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
    Ok(self.lock()?.get(name).map(|collection| {
      CollectionInfo::new(collection.schema.dimension, Some(collection.schema.metric))
    }))
  }

  async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
    let mut collections = self.lock()?;
    if collections.contains_key(&schema.name) {
      return Err(SearchError::upstream_rejected(
        SERVICE,
        format!("collection '{}' already exists", schema.name),
      ));
    }
    collections.insert(
      schema.name.clone(),
      MemoryCollection {
        schema: schema.clone(),
        entries: Vec::new(),
        flushes: 0,
        indexed_fields: BTreeSet::new(),
        loaded: false,
      },
    );
    Ok(())
  }

  async fn count(&self, name: &str) -> Result<u64> {
    let mut collections = self.lock()?;
    Ok(collection_mut(&mut collections, name)?.entries.len() as u64)
  }

  async fn insert(&self, schema: &CollectionSchema, records: &[EmbeddedRecord]) -> Result<()> {
    let mut collections = self.lock()?;
    let collection = collection_mut(&mut collections, &schema.name)?;
    let dimension = collection.schema.dimension;

    if let Some(bad) = records.iter().find(|record| record.vector().len() != dimension) {
      return Err(SearchError::invalid_argument(format!(
        "record {} has dimension {}, collection '{}' expects {}",
        bad.id(),
        bad.vector().len(),
        schema.name,
        dimension
      )));
    }

    for record in records {
      collection.upsert(record.clone());
    }
    Ok(())
  }

  async fn flush(&self, name: &str) -> Result<()> {
    let mut collections = self.lock()?;
    collection_mut(&mut collections, name)?.flushes += 1;
    Ok(())
  }

  async fn has_index(&self, name: &str, field: &str) -> Result<bool> {
    let mut collections = self.lock()?;
    Ok(collection_mut(&mut collections, name)?.indexed_fields.contains(field))
  }

  async fn create_index(
    &self,
    name: &str,
    field: &str,
    metric: Metric,
    _params: &IndexParams,
  ) -> Result<()> {
    let mut collections = self.lock()?;
    let collection = collection_mut(&mut collections, name)?;
    if field != collection.schema.vector_field {
      return Err(SearchError::upstream_rejected(
        SERVICE,
        format!("field '{field}' is not the vector field of '{name}'"),
      ));
    }
    if metric != collection.schema.metric {
      return Err(SearchError::schema_conflict(
        name,
        format!("metric {}", collection.schema.metric),
        format!("metric {metric}"),
      ));
    }
    collection.indexed_fields.insert(field.to_string());
    Ok(())
  }

  async fn load(&self, name: &str) -> Result<()> {
    let mut collections = self.lock()?;
    collection_mut(&mut collections, name)?.loaded = true;
    Ok(())
  }

  async fn query(&self, name: &str, request: &QueryRequest<'_>) -> Result<Vec<StoredMatch>> {
    let mut collections = self.lock()?;
    let collection = collection_mut(&mut collections, name)?;

    if !collection.loaded {
      return Err(SearchError::upstream_rejected(
        SERVICE,
        format!("collection '{name}' is not loaded"),
      ));
    }
    if request.vector.len() != collection.schema.dimension {
      return Err(SearchError::invalid_argument(format!(
        "query vector has dimension {}, collection '{}' expects {}",
        request.vector.len(),
        name,
        collection.schema.dimension
      )));
    }

    let metric = collection.schema.metric;
    let mut scored: Vec<(f32, &EmbeddedRecord)> = collection
      .entries
      .iter()
      .map(|entry| (score(metric, request.vector, entry.vector()), entry))
      .collect();

    // Stable sort: equal scores keep insertion order
    if metric.ascending() {
      scored.sort_by(|a, b| a.0.total_cmp(&b.0));
    } else {
      scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    }

    Ok(
      scored
        .into_iter()
        .take(request.top_k)
        .map(|(score, entry)| StoredMatch {
          id: RecordId::clone(entry.id()),
          metadata: project(entry.metadata(), request.output_fields),
          score,
        })
        .collect(),
    )
  }
}
