//! Bounded retries with exponential backoff for idempotent remote calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::Result;

const MAX_BACKOFF_SHIFT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  max_retries: u32,
  base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3, Duration::from_millis(200))
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32, base_delay: Duration) -> Self {
    Self { max_retries, base_delay }
  }

  /// Single attempt, no retries
  pub fn none() -> Self {
    Self::new(0, Duration::ZERO)
  }

  /// Delay before retry number `attempt` (0-based): base, 2x base, 4x base, ...
  pub fn delay_for(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
  }

  /// Run `op`, retrying retryable failures up to the policy's limit.
  ///
  /// Callers must only pass operations that are safe to repeat.
  pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(error) if error.is_retryable() && attempt < self.max_retries => {
          let delay = self.delay_for(attempt);
          tracing::warn!(
            operation,
            attempt = attempt + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            %error,
            "retrying after transient failure"
          );
          sleep(delay).await;
          attempt += 1;
        }
        Err(error) => return Err(error),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::SearchError;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[test]
  fn test_backoff_doubles() {
    let policy = RetryPolicy::new(5, Duration::from_millis(100));
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(800));
  }

  #[test]
  fn test_backoff_shift_is_capped() {
    let policy = RetryPolicy::new(50, Duration::from_millis(1));
    assert_eq!(policy.delay_for(40), Duration::from_millis(1024));
  }

  #[tokio::test]
  async fn test_transient_failures_are_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let policy = RetryPolicy::new(3, Duration::ZERO);

    let result = policy
      .run("count", || async move {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
          Err(SearchError::upstream_unavailable("milvus", "connection reset"))
        } else {
          Ok(42u64)
        }
      })
      .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_gives_up_after_limit() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let policy = RetryPolicy::new(2, Duration::ZERO);

    let result: Result<()> = policy
      .run("query", || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::upstream_unavailable("pinecone", "timed out"))
      })
      .await;

    assert!(matches!(result, Err(SearchError::UpstreamUnavailable { .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_rejections_are_not_retried() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let policy = RetryPolicy::new(5, Duration::ZERO);

    let result: Result<()> = policy
      .run("query", || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::upstream_rejected("milvus", "field not found"))
      })
      .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_none_policy_runs_once() {
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let result: Result<()> = RetryPolicy::none()
      .run("has_collection", || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::upstream_unavailable("milvus", "refused"))
      })
      .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }
}
