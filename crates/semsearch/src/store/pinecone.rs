//! Pinecone adapter
//!
//! Pinecone splits its API in two: a control plane (`api.pinecone.io`) that
//! manages indexes, and a per-index data plane host for vectors. The data
//! plane host is discovered from the control plane and cached. Pinecone
//! builds and serves its index on its own, so `has_index` is always true and
//! `create_index`/`load` have nothing to do.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};

use super::{QueryRequest, VectorStore};
use crate::config::PineconeConfig;
use crate::error::{Result, SearchError};
use crate::model::{
  CollectionInfo, CollectionSchema, EmbeddedRecord, IndexParams, Metadata, Metric, RecordId,
  StoredMatch,
};

const SERVICE: &str = "pinecone";
const API_VERSION: &str = "2024-07";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Largest `topK` the query endpoint accepts
const MAX_TOP_K: usize = 10_000;

#[derive(Debug, Deserialize)]
struct IndexDescription {
  #[serde(default)]
  dimension: usize,
  #[serde(default)]
  metric: Option<String>,
  #[serde(default)]
  host: Option<String>,
  #[serde(default)]
  status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
  #[serde(default)]
  ready: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
  #[serde(default)]
  total_vector_count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
  #[serde(default)]
  matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
  id: String,
  #[serde(default)]
  score: f32,
  #[serde(default)]
  metadata: Option<HashMap<String, Value>>,
}

pub struct PineconeStore {
  client: Client,
  control_url: String,
  api_key: String,
  placement: PineconeConfig,
  timeout: Duration,
  ready_timeout: Duration,
  poll_interval: Duration,
  hosts: Mutex<HashMap<String, String>>,
  /// Vectors written per index during this run, awaited by `flush`
  expected: Mutex<HashMap<String, u64>>,
}

impl PineconeStore {
  pub fn new(
    control_url: &str,
    api_key: String,
    placement: PineconeConfig,
    timeout: Duration,
    ready_timeout: Duration,
  ) -> Result<Self> {
    if api_key.trim().is_empty() {
      return Err(SearchError::configuration(
        "PINECONE_API_KEY not found. Set it in the environment or a .env file",
      ));
    }

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SearchError::configuration(format!("cannot build HTTP client: {e}")))?;

    Ok(Self {
      client,
      control_url: control_url.trim_end_matches('/').to_string(),
      api_key,
      placement,
      timeout,
      ready_timeout,
      poll_interval: DEFAULT_POLL_INTERVAL,
      hosts: Mutex::new(HashMap::new()),
      expected: Mutex::new(HashMap::new()),
    })
  }

  /// How often readiness and flush visibility are polled
  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// Send one request; `Ok(None)` means the resource does not exist (404)
  async fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<Option<Value>> {
    tracing::debug!(%method, %url, "pinecone request");

    let mut request = self
      .client
      .request(method, url)
      .header("Api-Key", &self.api_key)
      .header("X-Pinecone-API-Version", API_VERSION);
    if let Some(body) = &body {
      request = request.json(body);
    }

    let response = timeout(self.timeout, request.send())
      .await
      .map_err(|_| SearchError::upstream_unavailable(SERVICE, format!("{url} timed out")))?
      .map_err(|e| SearchError::from_http(SERVICE, e))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let text = response.text().await.map_err(|e| SearchError::from_http(SERVICE, e))?;
    if !status.is_success() {
      return Err(SearchError::from_status(SERVICE, status, &text));
    }
    if text.trim().is_empty() {
      return Ok(Some(Value::Null));
    }

    serde_json::from_str(&text)
      .map(Some)
      .map_err(|e| SearchError::upstream_rejected(SERVICE, format!("unexpected response: {e}")))
  }

  async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
    let url = format!("{}/indexes/{}", self.control_url, name);
    match self.send(Method::GET, &url, None).await? {
      Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
        SearchError::upstream_rejected(SERVICE, format!("unexpected index description: {e}"))
      }),
      None => Ok(None),
    }
  }

  fn cached_host(&self, name: &str) -> Option<String> {
    self.hosts.lock().ok()?.get(name).cloned()
  }

  fn remember_host(&self, name: &str, host: &str) {
    if let Ok(mut hosts) = self.hosts.lock() {
      hosts.insert(name.to_string(), host.to_string());
    }
  }

  /// Data plane base URL for an index
  async fn host(&self, name: &str) -> Result<String> {
    if let Some(host) = self.cached_host(name) {
      return Ok(host);
    }

    let description =
      self.describe_index(name).await?.ok_or_else(|| SearchError::collection_not_found(name))?;
    let host = description.host.filter(|h| !h.is_empty()).ok_or_else(|| {
      SearchError::upstream_rejected(SERVICE, format!("index '{name}' has no host yet"))
    })?;

    let host = data_plane_url(&host);
    self.remember_host(name, &host);
    Ok(host)
  }

  async fn data_call(&self, name: &str, path: &str, body: Value) -> Result<Value> {
    let url = format!("{}/{}", self.host(name).await?, path);
    self
      .send(Method::POST, &url, Some(body))
      .await?
      .ok_or_else(|| SearchError::collection_not_found(name))
  }

  async fn wait_until_ready(&self, name: &str) -> Result<()> {
    let deadline = Instant::now() + self.ready_timeout;
    loop {
      if let Some(description) = self.describe_index(name).await? {
        if description.status.ready {
          if let Some(host) = description.host.filter(|h| !h.is_empty()) {
            self.remember_host(name, &data_plane_url(&host));
          }
          return Ok(());
        }
      }

      if Instant::now() >= deadline {
        return Err(SearchError::upstream_unavailable(
          SERVICE,
          format!("index '{name}' not ready after {}s", self.ready_timeout.as_secs()),
        ));
      }
      bentley::verbose!("Waiting for index '{}' to become ready...", name);
      sleep(self.poll_interval).await;
    }
  }

  fn expected_count(&self, name: &str) -> u64 {
    self.expected.lock().map(|counts| counts.get(name).copied().unwrap_or(0)).unwrap_or(0)
  }
}

/// Hosts come back bare (`idx-abc.svc.pinecone.io`); local emulators include a scheme
fn data_plane_url(host: &str) -> String {
  let host = host.trim_end_matches('/');
  if host.contains("://") {
    host.to_string()
  } else {
    format!("https://{host}")
  }
}

fn metric_name(metric: Metric) -> &'static str {
  match metric {
    Metric::L2 => "euclidean",
    Metric::Cosine => "cosine",
  }
}

fn metadata_from(raw: Option<HashMap<String, Value>>, fields: &[String]) -> Metadata {
  let raw = raw.unwrap_or_default();
  fields
    .iter()
    .filter_map(|field| {
      raw.get(field).map(|value| {
        let text = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (field.clone(), text)
      })
    })
    .collect()
}

#[async_trait]
impl VectorStore for PineconeStore {
  fn service(&self) -> &str {
    SERVICE
  }

  async fn has_collection(&self, name: &str) -> Result<bool> {
    Ok(self.describe_index(name).await?.is_some())
  }

  async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
    Ok(self.describe_index(name).await?.map(|description| {
      CollectionInfo::reported(description.dimension, description.metric.as_deref())
    }))
  }

  async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
    tracing::info!(index = %schema.name, dimension = schema.dimension, "creating pinecone index");
    let url = format!("{}/indexes", self.control_url);
    let body = json!({
      "name": schema.name,
      "dimension": schema.dimension,
      "metric": metric_name(schema.metric),
      "spec": {
        "serverless": { "cloud": self.placement.cloud, "region": self.placement.region },
      },
    });

    self.send(Method::POST, &url, Some(body)).await?.ok_or_else(|| {
      SearchError::upstream_rejected(SERVICE, "index creation endpoint not found")
    })?;
    self.wait_until_ready(&schema.name).await
  }

  async fn count(&self, name: &str) -> Result<u64> {
    let stats = self.data_call(name, "describe_index_stats", json!({})).await?;
    let stats: IndexStats = serde_json::from_value(stats)
      .map_err(|e| SearchError::upstream_rejected(SERVICE, format!("unexpected stats: {e}")))?;
    Ok(stats.total_vector_count)
  }

  async fn insert(&self, schema: &CollectionSchema, records: &[EmbeddedRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    let vectors: Vec<Value> = records
      .iter()
      .map(|record| {
        json!({
          "id": record.id().to_string(),
          "values": record.vector(),
          "metadata": record.metadata(),
        })
      })
      .collect();

    self.data_call(&schema.name, "vectors/upsert", json!({ "vectors": vectors })).await?;

    if let Ok(mut expected) = self.expected.lock() {
      *expected.entry(schema.name.clone()).or_insert(0) += records.len() as u64;
    }
    Ok(())
  }

  /// Pinecone has no flush; wait until the vectors written this run are counted
  async fn flush(&self, name: &str) -> Result<()> {
    let expected = self.expected_count(name);
    let deadline = Instant::now() + self.ready_timeout;

    loop {
      let visible = self.count(name).await?;
      if visible >= expected {
        return Ok(());
      }
      if Instant::now() >= deadline {
        tracing::warn!(index = name, visible, expected, "upserted vectors not yet visible");
        return Ok(());
      }
      sleep(self.poll_interval).await;
    }
  }

  async fn has_index(&self, _name: &str, _field: &str) -> Result<bool> {
    Ok(true)
  }

  async fn create_index(
    &self,
    _name: &str,
    _field: &str,
    _metric: Metric,
    _params: &IndexParams,
  ) -> Result<()> {
    Ok(())
  }

  async fn load(&self, _name: &str) -> Result<()> {
    Ok(())
  }

  async fn query(&self, name: &str, request: &QueryRequest<'_>) -> Result<Vec<StoredMatch>> {
    let body = json!({
      "vector": request.vector,
      "topK": request.top_k.min(MAX_TOP_K),
      "includeMetadata": true,
      "includeValues": false,
    });
    let response = self.data_call(name, "query", body).await?;
    let response: QueryResponse = serde_json::from_value(response).map_err(|e| {
      SearchError::upstream_rejected(SERVICE, format!("unexpected query reply: {e}"))
    })?;

    Ok(
      response
        .matches
        .into_iter()
        .map(|hit| StoredMatch {
          id: RecordId::from_wire(&hit.id),
          metadata: metadata_from(hit.metadata, request.output_fields),
          score: hit.score,
        })
        .collect(),
    )
  }
}
