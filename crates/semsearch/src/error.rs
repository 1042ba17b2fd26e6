use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
  #[error("Configuration error: {message}")]
  Configuration { message: String },

  #[error(
    "Collection '{collection}' exists with an incompatible schema: \
     expected {expected}, found {found}"
  )]
  SchemaConflict { collection: String, expected: String, found: String },

  #[error("{service} is unavailable: {message}")]
  UpstreamUnavailable { service: String, message: String },

  #[error("{service} rejected the request: {message}")]
  UpstreamRejected { service: String, message: String },

  #[error("Invalid argument: {message}")]
  InvalidArgument { message: String },

  #[error("Collection '{collection}' not found")]
  CollectionNotFound { collection: String },

  #[error("Corpus error: {message}")]
  Corpus { message: String },
}

impl SearchError {
  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration { message: message.into() }
  }

  pub fn schema_conflict(
    collection: impl Into<String>,
    expected: impl Into<String>,
    found: impl Into<String>,
  ) -> Self {
    Self::SchemaConflict {
      collection: collection.into(),
      expected: expected.into(),
      found: found.into(),
    }
  }

  pub fn upstream_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
    Self::UpstreamUnavailable { service: service.into(), message: message.into() }
  }

  pub fn upstream_rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
    Self::UpstreamRejected { service: service.into(), message: message.into() }
  }

  pub fn invalid_argument(message: impl Into<String>) -> Self {
    Self::InvalidArgument { message: message.into() }
  }

  pub fn collection_not_found(collection: impl Into<String>) -> Self {
    Self::CollectionNotFound { collection: collection.into() }
  }

  pub fn corpus(message: impl Into<String>) -> Self {
    Self::Corpus { message: message.into() }
  }

  /// Only transport-level failures are worth another attempt
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::UpstreamUnavailable { .. })
  }

  /// Classify a reqwest failure for `service`.
  ///
  /// Connection, timeout and request-send failures are transient; anything
  /// else (bad body, decode failure) is the service's answer and is final.
  pub fn from_http(service: &str, error: reqwest::Error) -> Self {
    if error.is_connect() || error.is_timeout() || error.is_request() {
      Self::upstream_unavailable(service, error.to_string())
    } else {
      Self::upstream_rejected(service, error.to_string())
    }
  }

  /// Map a non-success HTTP status to the matching error kind
  pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
    let message = if body.trim().is_empty() {
      format!("HTTP {status}")
    } else {
      format!("HTTP {status}: {}", body.trim())
    };

    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
      Self::upstream_unavailable(service, message)
    } else {
      Self::upstream_rejected(service, message)
    }
  }
}

pub type Result<T> = std::result::Result<T, SearchError>;
