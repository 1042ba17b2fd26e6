//! Text embedding providers
//!
//! Every provider maps text to a fixed-length `f32` vector. The same
//! provider instance must embed both the corpus and the queries so the two
//! live in the same space.

mod hashing;
mod http;
#[cfg(feature = "ml-features")]
mod onnx;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, EmbedderKind};
use crate::error::{Result, SearchError};

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;
#[cfg(feature = "ml-features")]
pub use onnx::OnnxEmbedder;

#[async_trait]
pub trait Embedder: Send + Sync {
  /// Identifier of the underlying model, for logs
  fn model_name(&self) -> &str;

  /// Length of every vector this provider produces
  fn dimension(&self) -> usize;

  async fn encode(&self, text: &str) -> Result<Vec<f32>> {
    let mut vectors = self.encode_batch(&[text.to_string()]).await?;
    vectors
      .pop()
      .ok_or_else(|| SearchError::upstream_rejected(self.model_name(), "no embedding returned"))
  }

  /// One vector per input, in input order
  async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedder selected by `config`
pub async fn build(config: &Config) -> Result<Arc<dyn Embedder>> {
  let embedder: Arc<dyn Embedder> = match config.embedder.kind {
    EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.dimension)),
    EmbedderKind::Http => Arc::new(HttpEmbedder::new(
      &config.embedder.endpoint,
      &config.embedder.model,
      config.dimension,
      config.request_timeout(),
      config.retry_policy(),
    )?),
    #[cfg(feature = "ml-features")]
    EmbedderKind::Onnx => Arc::new(OnnxEmbedder::load(&config.embedder.model).await?),
    #[cfg(not(feature = "ml-features"))]
    EmbedderKind::Onnx => {
      return Err(SearchError::configuration(
        "the onnx embedder requires building with the 'ml-features' feature",
      ));
    }
  };

  if embedder.dimension() != config.dimension {
    return Err(SearchError::configuration(format!(
      "embedder '{}' produces {}-dimensional vectors, configuration expects {}",
      embedder.model_name(),
      embedder.dimension(),
      config.dimension
    )));
  }

  bentley::verbose!("Embedding with {} ({} dims)", embedder.model_name(), embedder.dimension());
  Ok(embedder)
}

/// Mean of the token vectors whose attention mask is set.
///
/// `data` is a `[seq_len, hidden]` row-major block for one sequence.
pub fn mean_pool(data: &[f32], mask: &[u32], hidden: usize) -> Vec<f32> {
  let mut pooled = vec![0.0f32; hidden];
  let mut counted = 0usize;

  for (token, row) in data.chunks_exact(hidden).enumerate() {
    if mask.get(token).copied().unwrap_or(0) == 0 {
      continue;
    }
    counted += 1;
    for (sum, value) in pooled.iter_mut().zip(row) {
      *sum += value;
    }
  }

  if counted > 0 {
    for value in pooled.iter_mut() {
      *value /= counted as f32;
    }
  }
  pooled
}

/// Scale to unit length; zero vectors are returned unchanged
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
  let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
  if magnitude < f32::EPSILON {
    return vector;
  }
  for value in vector.iter_mut() {
    *value /= magnitude;
  }
  vector
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Profile;

  #[test]
  fn test_mean_pool_skips_padding() {
    let data = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
    let pooled = mean_pool(&data, &[1, 1, 0], 2);
    assert_eq!(pooled, vec![2.0, 3.0]);
  }

  #[test]
  fn test_mean_pool_all_masked_is_zero() {
    let pooled = mean_pool(&[1.0, 1.0], &[0], 2);
    assert_eq!(pooled, vec![0.0, 0.0]);
  }

  #[test]
  fn test_normalize_unit_length() {
    let normalized = normalize(vec![3.0, 4.0]);
    assert!((normalized[0] - 0.6).abs() < 1e-6);
    assert!((normalized[1] - 0.8).abs() < 1e-6);
    assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
  }

  #[tokio::test]
  async fn test_build_hashing_embedder() {
    let mut config = Config::defaults_for(Profile::Movies);
    config.go_offline();
    config.dimension = 64;

    let embedder = build(&config).await.unwrap();
    assert_eq!(embedder.dimension(), 64);
    assert_eq!(embedder.encode("Comedy").await.unwrap().len(), 64);
  }

  #[cfg(not(feature = "ml-features"))]
  #[tokio::test]
  async fn test_build_onnx_without_feature_fails() {
    let mut config = Config::defaults_for(Profile::Movies);
    config.embedder.kind = EmbedderKind::Onnx;

    let err = build(&config).await.err().unwrap();
    assert!(matches!(err, SearchError::Configuration { .. }));
  }
}
