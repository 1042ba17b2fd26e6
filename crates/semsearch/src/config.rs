//! Runtime configuration
//!
//! Layering, lowest to highest precedence: built-in defaults for the chosen
//! profile, an optional YAML file, `SEMSEARCH_*` environment variables, and
//! finally whatever the CLI overrides before calling [`Config::validate`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SearchError};
use crate::model::{IndexParams, Metric};
use crate::store::retry::RetryPolicy;

const ENV_PREFIX: &str = "SEMSEARCH_";

/// Which demonstration corpus a run is built around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
  Movies,
  Notes,
}

impl std::fmt::Display for Profile {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Profile::Movies => f.write_str("movies"),
      Profile::Notes => f.write_str("notes"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  Milvus,
  Pinecone,
  Memory,
}

impl FromStr for Backend {
  type Err = SearchError;

  fn from_str(value: &str) -> Result<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "milvus" => Ok(Backend::Milvus),
      "pinecone" => Ok(Backend::Pinecone),
      "memory" => Ok(Backend::Memory),
      other => Err(SearchError::configuration(format!(
        "unknown backend '{other}', expected milvus, pinecone or memory"
      ))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
  Http,
  Onnx,
  Hashing,
}

impl FromStr for EmbedderKind {
  type Err = SearchError;

  fn from_str(value: &str) -> Result<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "http" => Ok(EmbedderKind::Http),
      "onnx" => Ok(EmbedderKind::Onnx),
      "hashing" => Ok(EmbedderKind::Hashing),
      other => Err(SearchError::configuration(format!(
        "unknown embedder '{other}', expected http, onnx or hashing"
      ))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderConfig {
  pub kind: EmbedderKind,
  /// Base URL of the embedding server (http kind only)
  pub endpoint: String,
  pub model: String,
}

impl Default for EmbedderConfig {
  fn default() -> Self {
    Self {
      kind: EmbedderKind::Http,
      endpoint: "http://localhost:8080".to_string(),
      model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
    }
  }
}

/// Serverless placement for newly created Pinecone indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PineconeConfig {
  pub cloud: String,
  pub region: String,
}

impl Default for PineconeConfig {
  fn default() -> Self {
    Self { cloud: "aws".to_string(), region: "us-east-1".to_string() }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
  pub backend: Backend,
  /// Vector store endpoint (Milvus REST base URL or Pinecone control plane)
  pub endpoint: String,
  pub api_key: Option<String>,
  pub collection: String,
  pub dimension: usize,
  pub metric: Metric,
  pub top_k: usize,
  pub corpus_cap: usize,
  pub insert_batch_size: usize,
  pub content_hash_ids: bool,
  pub timeout_secs: u64,
  pub max_retries: u32,
  pub retry_base_delay_ms: u64,
  pub ready_timeout_secs: u64,
  pub index: IndexParams,
  pub pinecone: PineconeConfig,
  pub embedder: EmbedderConfig,
}

impl Config {
  /// Built-in defaults for a profile
  pub fn defaults_for(profile: Profile) -> Self {
    let base = Self {
      backend: Backend::Milvus,
      endpoint: "http://milvus-standalone:19530".to_string(),
      api_key: None,
      collection: "movie_recommender".to_string(),
      dimension: 384,
      metric: Metric::L2,
      top_k: 5,
      corpus_cap: 5000,
      insert_batch_size: 100,
      content_hash_ids: false,
      timeout_secs: 30,
      max_retries: 3,
      retry_base_delay_ms: 200,
      ready_timeout_secs: 60,
      index: IndexParams::default(),
      pinecone: PineconeConfig::default(),
      embedder: EmbedderConfig::default(),
    };

    match profile {
      Profile::Movies => base,
      Profile::Notes => Self {
        backend: Backend::Pinecone,
        endpoint: "https://api.pinecone.io".to_string(),
        collection: "smart-notes".to_string(),
        metric: Metric::Cosine,
        top_k: 3,
        ..base
      },
    }
  }

  /// Defaults, then the YAML file (if any), then the process environment, then validation
  pub fn load(profile: Profile, path: Option<&Path>) -> Result<Self> {
    Self::load_with(profile, path, |_| {})
  }

  /// Like [`Config::load`], with `overrides` (CLI flags) applied just before validation
  pub fn load_with<F>(profile: Profile, path: Option<&Path>, overrides: F) -> Result<Self>
  where
    F: FnOnce(&mut Config),
  {
    let mut config = Self::defaults_for(profile);

    if let Some(path) = path {
      let contents = std::fs::read_to_string(path).map_err(|e| {
        SearchError::configuration(format!("cannot read config file {}: {e}", path.display()))
      })?;
      config = config.merge_yaml(&contents)?;
    }

    config.apply_env(|key| std::env::var(key).ok())?;
    overrides(&mut config);
    config.validate()?;
    Ok(config)
  }

  /// Overlay a (possibly partial) YAML document onto this configuration
  pub fn merge_yaml(self, contents: &str) -> Result<Self> {
    let overlay: serde_yaml::Value = serde_yaml::from_str(contents)
      .map_err(|e| SearchError::configuration(format!("invalid config YAML: {e}")))?;

    if overlay.is_null() {
      return Ok(self);
    }

    let mut base = serde_yaml::to_value(&self)
      .map_err(|e| SearchError::configuration(format!("cannot serialize config: {e}")))?;
    merge_values(&mut base, overlay);

    serde_yaml::from_value(base)
      .map_err(|e| SearchError::configuration(format!("invalid config value: {e}")))
  }

  /// Apply `SEMSEARCH_*` overrides read through `lookup`
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

    if let Some(value) = var("BACKEND") {
      self.backend = value.parse()?;
    }
    if let Some(value) = var("ENDPOINT") {
      self.endpoint = value;
    }
    if let Some(value) = var("API_KEY").or_else(|| lookup("PINECONE_API_KEY")) {
      self.api_key = Some(value);
    }
    if let Some(value) = var("COLLECTION") {
      self.collection = value;
    }
    if let Some(value) = var("DIMENSION") {
      self.dimension = parse_number("DIMENSION", &value)?;
    }
    if let Some(value) = var("METRIC") {
      self.metric = value.parse()?;
    }
    if let Some(value) = var("TOP_K") {
      self.top_k = parse_number("TOP_K", &value)?;
    }
    if let Some(value) = var("CORPUS_CAP") {
      self.corpus_cap = parse_number("CORPUS_CAP", &value)?;
    }
    if let Some(value) = var("INSERT_BATCH_SIZE") {
      self.insert_batch_size = parse_number("INSERT_BATCH_SIZE", &value)?;
    }
    if let Some(value) = var("CONTENT_HASH_IDS") {
      self.content_hash_ids = parse_flag("CONTENT_HASH_IDS", &value)?;
    }
    if let Some(value) = var("TIMEOUT_SECS") {
      self.timeout_secs = parse_number("TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = var("MAX_RETRIES") {
      self.max_retries = parse_number("MAX_RETRIES", &value)?;
    }
    if let Some(value) = var("RETRY_BASE_DELAY_MS") {
      self.retry_base_delay_ms = parse_number("RETRY_BASE_DELAY_MS", &value)?;
    }
    if let Some(value) = var("READY_TIMEOUT_SECS") {
      self.ready_timeout_secs = parse_number("READY_TIMEOUT_SECS", &value)?;
    }
    if let Some(value) = var("PINECONE_CLOUD") {
      self.pinecone.cloud = value;
    }
    if let Some(value) = var("PINECONE_REGION") {
      self.pinecone.region = value;
    }
    if let Some(value) = var("EMBEDDER") {
      self.embedder.kind = value.parse()?;
    }
    if let Some(value) = var("EMBEDDER_ENDPOINT") {
      self.embedder.endpoint = value;
    }
    if let Some(value) = var("EMBEDDER_MODEL") {
      self.embedder.model = value;
    }

    Ok(())
  }

  /// Reject configurations that cannot work before any network call is made
  pub fn validate(&self) -> Result<()> {
    if self.collection.trim().is_empty() {
      return Err(SearchError::configuration("collection name must not be empty"));
    }
    if self.dimension == 0 {
      return Err(SearchError::configuration("dimension must be greater than zero"));
    }
    if self.top_k == 0 {
      return Err(SearchError::configuration("top_k must be greater than zero"));
    }
    if self.insert_batch_size == 0 {
      return Err(SearchError::configuration("insert_batch_size must be greater than zero"));
    }
    if self.timeout_secs == 0 {
      return Err(SearchError::configuration("timeout_secs must be greater than zero"));
    }
    if self.ready_timeout_secs == 0 {
      return Err(SearchError::configuration("ready_timeout_secs must be greater than zero"));
    }

    match self.backend {
      Backend::Pinecone => {
        if self.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
          return Err(SearchError::configuration(
            "PINECONE_API_KEY not found. Set it in the environment or a .env file",
          ));
        }
        validate_url("endpoint", &self.endpoint)?;
      }
      Backend::Milvus => validate_url("endpoint", &self.endpoint)?,
      Backend::Memory => {}
    }

    match self.embedder.kind {
      EmbedderKind::Http => validate_url("embedder endpoint", &self.embedder.endpoint)?,
      EmbedderKind::Onnx if !cfg!(feature = "ml-features") => {
        return Err(SearchError::configuration(
          "the onnx embedder requires building with the 'ml-features' feature",
        ));
      }
      EmbedderKind::Onnx | EmbedderKind::Hashing => {}
    }

    Ok(())
  }

  /// Switch to the in-process store and embedder, for runs without any services
  pub fn go_offline(&mut self) {
    self.backend = Backend::Memory;
    self.embedder.kind = EmbedderKind::Hashing;
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn ready_timeout(&self) -> Duration {
    Duration::from_secs(self.ready_timeout_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms))
  }
}

fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
  match (base, overlay) {
    (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
      for (key, value) in overlay_map {
        match base_map.get_mut(&key) {
          Some(existing) => merge_values(existing, value),
          None => {
            base_map.insert(key, value);
          }
        }
      }
    }
    (slot, value) => *slot = value,
  }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T> {
  value.trim().parse().map_err(|_| {
    SearchError::configuration(format!("{ENV_PREFIX}{name} must be a number, got '{value}'"))
  })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(SearchError::configuration(format!(
      "{ENV_PREFIX}{name} must be true or false, got '{value}'"
    ))),
  }
}

fn validate_url(what: &str, value: &str) -> Result<()> {
  url::Url::parse(value)
    .map(|_| ())
    .map_err(|e| SearchError::configuration(format!("{what} '{value}' is not a valid URL: {e}")))
}
