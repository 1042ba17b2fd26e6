//! Client for a text-embeddings-inference style server (`POST /embed`)

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

use super::Embedder;
use crate::error::{Result, SearchError};
use crate::store::RetryPolicy;

const SERVICE: &str = "embedding server";
const BATCH_SIZE: usize = 32;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  inputs: &'a [String],
  normalize: bool,
  truncate: bool,
}

pub struct HttpEmbedder {
  client: Client,
  url: String,
  model: String,
  dimension: usize,
  timeout: Duration,
  retry: RetryPolicy,
}

impl HttpEmbedder {
  pub fn new(
    endpoint: &str,
    model: &str,
    dimension: usize,
    timeout: Duration,
    retry: RetryPolicy,
  ) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SearchError::configuration(format!("cannot build HTTP client: {e}")))?;

    Ok(Self {
      client,
      url: format!("{}/embed", endpoint.trim_end_matches('/')),
      model: model.to_string(),
      dimension,
      timeout,
      retry,
    })
  }

  async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let request = EmbedRequest { inputs: texts, normalize: true, truncate: true };

    let response = timeout(self.timeout, self.client.post(&self.url).json(&request).send())
      .await
      .map_err(|_| SearchError::upstream_unavailable(SERVICE, "request timed out"))?
      .map_err(|e| SearchError::from_http(SERVICE, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(SearchError::from_status(SERVICE, status, &body));
    }

    let vectors: Vec<Vec<f32>> = response.json().await.map_err(|e| {
      SearchError::upstream_rejected(SERVICE, format!("unexpected embedding response: {e}"))
    })?;

    if vectors.len() != texts.len() {
      return Err(SearchError::upstream_rejected(
        SERVICE,
        format!("asked for {} embeddings, received {}", texts.len(), vectors.len()),
      ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
      return Err(SearchError::configuration(format!(
        "model '{}' returned {}-dimensional vectors, expected {}",
        self.model,
        bad.len(),
        self.dimension
      )));
    }

    Ok(vectors)
  }
}

#[async_trait]
impl Embedder for HttpEmbedder {
  fn model_name(&self) -> &str {
    &self.model
  }

  fn dimension(&self) -> usize {
    self.dimension
  }

  async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if let Some(position) = texts.iter().position(|text| text.trim().is_empty()) {
      return Err(SearchError::invalid_argument(format!("text #{} is empty", position + 1)));
    }

    let mut vectors = Vec::with_capacity(texts.len());
    for chunk in texts.chunks(BATCH_SIZE) {
      let embedded = self.retry.run("embed", || self.embed_chunk(chunk)).await?;
      vectors.extend(embedded);
    }
    Ok(vectors)
  }
}
