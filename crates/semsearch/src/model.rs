//! Core data types shared by the pipelines and the store adapters

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SearchError};

/// Display fields attached to a record (title, genre, text, ...)
pub type Metadata = BTreeMap<String, String>;

/// Record identity: either an integer key or a string key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Int(i64),
  Str(String),
}

impl RecordId {
  /// Parse an id that travelled as text; integer-looking ids come back as `Int`
  pub fn from_wire(raw: &str) -> Self {
    raw.parse::<i64>().map(RecordId::Int).unwrap_or_else(|_| RecordId::Str(raw.to_string()))
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Int(value) => write!(f, "{value}"),
      RecordId::Str(value) => f.write_str(value),
    }
  }
}

impl From<i64> for RecordId {
  fn from(value: i64) -> Self {
    RecordId::Int(value)
  }
}

impl From<&str> for RecordId {
  fn from(value: &str) -> Self {
    RecordId::Str(value.to_string())
  }
}

impl From<String> for RecordId {
  fn from(value: String) -> Self {
    RecordId::Str(value)
  }
}

/// A unit of the corpus. Identity is `id`; `text` is what gets embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id: RecordId,
  pub text: String,
  pub metadata: Metadata,
}

impl Record {
  pub fn new(id: impl Into<RecordId>, text: impl Into<String>) -> Self {
    Self { id: id.into(), text: text.into(), metadata: Metadata::new() }
  }

  pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.metadata.insert(key.into(), value.into());
    self
  }

  /// Stable id derived from the text and metadata, so identical content upserts onto itself.
  /// Each part is length-prefixed and metadata is hashed in key order.
  pub fn content_id(&self) -> RecordId {
    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
      hasher.update((part.len() as u64).to_le_bytes());
      hasher.update(part.as_bytes());
    };
    feed(&self.text);
    for (key, value) in &self.metadata {
      feed(key);
      feed(value);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(16).map(|byte| format!("{byte:02x}")).collect();
    RecordId::Str(hex)
  }
}

/// A record paired with its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
  record: Record,
  vector: Vec<f32>,
}

impl EmbeddedRecord {
  /// Pair a record with its vector, rejecting vectors of the wrong length
  pub fn new(record: Record, vector: Vec<f32>, dimension: usize) -> Result<Self> {
    if vector.len() != dimension {
      return Err(SearchError::invalid_argument(format!(
        "vector for record {} has dimension {}, collection expects {}",
        record.id,
        vector.len(),
        dimension
      )));
    }
    Ok(Self { record, vector })
  }

  pub fn id(&self) -> &RecordId {
    &self.record.id
  }

  pub fn metadata(&self) -> &Metadata {
    &self.record.metadata
  }

  pub fn vector(&self) -> &[f32] {
    &self.vector
  }
}

/// Similarity function a collection is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
  /// Euclidean distance, smaller is closer
  L2,
  /// Cosine similarity, larger is closer
  Cosine,
}

impl Metric {
  /// Whether smaller scores rank first
  pub fn ascending(self) -> bool {
    matches!(self, Metric::L2)
  }

  /// Label used when printing scores
  pub fn score_label(self) -> &'static str {
    match self {
      Metric::L2 => "Distance",
      Metric::Cosine => "Similarity",
    }
  }
}

impl fmt::Display for Metric {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Metric::L2 => f.write_str("L2"),
      Metric::Cosine => f.write_str("cosine"),
    }
  }
}

impl FromStr for Metric {
  type Err = SearchError;

  fn from_str(value: &str) -> Result<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "l2" | "euclidean" => Ok(Metric::L2),
      "cosine" => Ok(Metric::Cosine),
      other => Err(SearchError::configuration(format!(
        "unknown metric '{other}', expected 'l2' or 'cosine'"
      ))),
    }
  }
}

/// Primary key type of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdKind {
  Int64,
  VarChar,
}

/// A scalar metadata column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
  pub name: String,
  pub max_length: usize,
}

impl FieldSpec {
  pub fn new(name: impl Into<String>, max_length: usize) -> Self {
    Self { name: name.into(), max_length }
  }
}

/// Declared shape of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
  pub name: String,
  pub id_field: String,
  pub id_kind: IdKind,
  pub metadata_fields: Vec<FieldSpec>,
  pub vector_field: String,
  pub dimension: usize,
  pub metric: Metric,
  pub description: String,
}

impl CollectionSchema {
  pub fn metadata_field_names(&self) -> Vec<String> {
    self.metadata_fields.iter().map(|field| field.name.clone()).collect()
  }

  /// Compare against what a store reports for an existing collection
  pub fn check_compatible(&self, info: &CollectionInfo) -> Result<()> {
    if info.dimension != self.dimension {
      return Err(SearchError::schema_conflict(
        &self.name,
        format!("dimension {}", self.dimension),
        format!("dimension {}", info.dimension),
      ));
    }

    let found = match &info.metric {
      None => return Ok(()),
      Some(ReportedMetric::Known(metric)) if *metric == self.metric => return Ok(()),
      Some(ReportedMetric::Known(metric)) => metric.to_string(),
      Some(ReportedMetric::Unsupported(raw)) => raw.clone(),
    };

    Err(SearchError::schema_conflict(
      &self.name,
      format!("metric {}", self.metric),
      format!("metric {found}"),
    ))
  }
}

/// A metric name as a store reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedMetric {
  Known(Metric),
  /// A metric this crate cannot rank with (`IP`, `dotproduct`, ...)
  Unsupported(String),
}

impl ReportedMetric {
  pub fn parse(raw: &str) -> Self {
    raw.parse::<Metric>().map(ReportedMetric::Known).unwrap_or_else(|_| {
      ReportedMetric::Unsupported(raw.trim().to_string())
    })
  }
}

/// What a store knows about an existing collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
  pub dimension: usize,
  /// `None` when the store only fixes the metric at index time and no index exists yet
  pub metric: Option<ReportedMetric>,
}

impl CollectionInfo {
  pub fn new(dimension: usize, metric: Option<Metric>) -> Self {
    Self { dimension, metric: metric.map(ReportedMetric::Known) }
  }

  /// Build from the metric name a store returned, keeping names outside [`Metric`]
  pub fn reported(dimension: usize, metric: Option<&str>) -> Self {
    Self { dimension, metric: metric.map(ReportedMetric::parse) }
  }
}

/// Parameters for stores that build an explicit ANN index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
  pub index_type: String,
  pub nlist: u32,
  pub nprobe: u32,
}

impl Default for IndexParams {
  fn default() -> Self {
    Self { index_type: "IVF_FLAT".to_string(), nlist: 128, nprobe: 10 }
  }
}

/// Raw hit as returned by a store, in store order
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
  pub id: RecordId,
  pub metadata: Metadata,
  pub score: f32,
}

/// One ranked answer to a query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
  /// 1-based position in the store's ordering
  pub rank: usize,
  pub record_id: RecordId,
  pub metadata: Metadata,
  pub score: f32,
  pub metric: Metric,
}
