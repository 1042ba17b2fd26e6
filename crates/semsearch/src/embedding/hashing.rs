//! Offline embedder based on feature hashing
//!
//! Each lowercase alphanumeric token is hashed into one signed bucket and the
//! bag of buckets is normalized. Texts sharing words land close together,
//! which is enough for the demos to rank sensibly without a model server.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{normalize, Embedder};
use crate::error::{Result, SearchError};

const MODEL_NAME: &str = "feature-hashing";

pub struct HashingEmbedder {
  dimension: usize,
}

impl HashingEmbedder {
  pub fn new(dimension: usize) -> Self {
    Self { dimension }
  }

  fn embed(&self, text: &str) -> Result<Vec<f32>> {
    if self.dimension == 0 {
      return Err(SearchError::configuration("embedding dimension must be greater than zero"));
    }

    let mut vector = vec![0.0f32; self.dimension];
    let mut tokens = 0;

    for token in tokenize(text) {
      let digest = Sha256::digest(token.as_bytes());
      let bucket = u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
      ]) as usize
        % self.dimension;
      let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
      vector[bucket] += sign;
      tokens += 1;
    }

    if tokens == 0 {
      return Err(SearchError::invalid_argument("cannot embed text without any words"));
    }
    Ok(normalize(vector))
  }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
  text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase)
}

#[async_trait]
impl Embedder for HashingEmbedder {
  fn model_name(&self) -> &str {
    MODEL_NAME
  }

  fn dimension(&self) -> usize {
    self.dimension
  }

  async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    texts.iter().map(|text| self.embed(text)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
  }

  #[tokio::test]
  async fn test_deterministic_and_normalized() {
    let embedder = HashingEmbedder::new(128);
    let a = embedder.encode("Action|Thriller|Sci-Fi").await.unwrap();
    let b = embedder.encode("Action|Thriller|Sci-Fi").await.unwrap();

    assert_eq!(a, b);
    assert_eq!(a.len(), 128);
    let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
  }

  #[tokio::test]
  async fn test_case_and_punctuation_insensitive() {
    let embedder = HashingEmbedder::new(64);
    let a = embedder.encode("Animation|Children").await.unwrap();
    let b = embedder.encode("animation children").await.unwrap();
    assert_eq!(a, b);
  }

  #[tokio::test]
  async fn test_shared_words_are_closer() {
    let embedder = HashingEmbedder::new(256);
    let query = embedder.encode("Action Thriller").await.unwrap();
    let related = embedder.encode("Action|Crime|Thriller").await.unwrap();
    let unrelated = embedder.encode("Documentary|Musical").await.unwrap();

    assert!(l2(&query, &related) < l2(&query, &unrelated));
  }

  #[tokio::test]
  async fn test_batch_preserves_order() {
    let embedder = HashingEmbedder::new(32);
    let texts = vec!["Comedy".to_string(), "Drama".to_string()];
    let batch = embedder.encode_batch(&texts).await.unwrap();

    assert_eq!(batch[0], embedder.encode("Comedy").await.unwrap());
    assert_eq!(batch[1], embedder.encode("Drama").await.unwrap());
  }

  #[tokio::test]
  async fn test_text_without_words_is_rejected() {
    let embedder = HashingEmbedder::new(32);
    let err = embedder.encode(" | ").await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument { .. }));
  }
}
