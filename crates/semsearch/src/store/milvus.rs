//! Milvus adapter over the RESTful v2 API
//!
//! Every call is a POST to `/v2/vectordb/<resource>/<action>` answered with a
//! `{"code", "data", "message"}` envelope. A non-zero `code` is Milvus
//! refusing the request even though HTTP itself succeeded.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::timeout;

use super::{QueryRequest, VectorStore};
use crate::error::{Result, SearchError};
use crate::model::{
  CollectionInfo, CollectionSchema, EmbeddedRecord, IdKind, IndexParams, Metadata, Metric,
  RecordId, StoredMatch,
};

const SERVICE: &str = "milvus";
const ID_MAX_LENGTH: usize = 64;
/// Largest search `limit` Milvus accepts
const MAX_LIMIT: usize = 16_384;

#[derive(Debug, Deserialize)]
struct Envelope {
  #[serde(default)]
  code: i64,
  #[serde(default)]
  data: Value,
  #[serde(default)]
  message: String,
}

pub struct MilvusStore {
  client: Client,
  base_url: String,
  token: Option<String>,
  timeout: Duration,
}

impl MilvusStore {
  pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SearchError::configuration(format!("cannot build HTTP client: {e}")))?;

    Ok(Self {
      client,
      base_url: endpoint.trim_end_matches('/').to_string(),
      token: token.filter(|t| !t.trim().is_empty()),
      timeout,
    })
  }

  async fn call(&self, path: &str, body: Value) -> Result<Value> {
    let url = format!("{}/v2/vectordb/{}", self.base_url, path);
    tracing::debug!(%url, "milvus request");

    let mut request = self.client.post(&url).json(&body);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = timeout(self.timeout, request.send())
      .await
      .map_err(|_| SearchError::upstream_unavailable(SERVICE, format!("{path} timed out")))?
      .map_err(|e| SearchError::from_http(SERVICE, e))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| SearchError::from_http(SERVICE, e))?;
    if !status.is_success() {
      return Err(SearchError::from_status(SERVICE, status, &text));
    }

    let envelope: Envelope = serde_json::from_str(&text).map_err(|e| {
      SearchError::upstream_rejected(SERVICE, format!("unexpected response from {path}: {e}"))
    })?;

    if envelope.code != 0 {
      return Err(envelope_error(body.get("collectionName"), envelope));
    }

    Ok(envelope.data)
  }
}

fn envelope_error(collection: Option<&Value>, envelope: Envelope) -> SearchError {
  let lowered = envelope.message.to_ascii_lowercase();
  if lowered.contains("collection not found") || lowered.contains("can't find collection") {
    let name = collection.and_then(Value::as_str).unwrap_or_default();
    return SearchError::collection_not_found(name);
  }
  SearchError::upstream_rejected(SERVICE, format!("code {}: {}", envelope.code, envelope.message))
}

fn metric_name(metric: Metric) -> &'static str {
  match metric {
    Metric::L2 => "L2",
    Metric::Cosine => "COSINE",
  }
}

/// Numbers sometimes arrive quoted
fn as_u64(value: &Value) -> Option<u64> {
  value.as_u64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn parse_collection_info(data: &Value) -> Result<CollectionInfo> {
  let fields = data.get("fields").and_then(Value::as_array).cloned().unwrap_or_default();

  let dimension = fields
    .iter()
    .filter(|field| field.get("type").and_then(Value::as_str) == Some("FloatVector"))
    .filter_map(|field| field.get("params").and_then(Value::as_array))
    .flatten()
    .find(|param| param.get("key").and_then(Value::as_str) == Some("dim"))
    .and_then(|param| param.get("value"))
    .and_then(as_u64)
    .ok_or_else(|| SearchError::upstream_rejected(SERVICE, "collection has no vector dimension"))?;

  let metric = data
    .get("indexes")
    .and_then(Value::as_array)
    .and_then(|indexes| indexes.first())
    .and_then(|index| index.get("metricType"))
    .and_then(Value::as_str);

  Ok(CollectionInfo::reported(dimension as usize, metric))
}

fn schema_body(schema: &CollectionSchema) -> Value {
  let id_field = match schema.id_kind {
    IdKind::Int64 => json!({
      "fieldName": schema.id_field,
      "dataType": "Int64",
      "isPrimary": true,
    }),
    IdKind::VarChar => json!({
      "fieldName": schema.id_field,
      "dataType": "VarChar",
      "isPrimary": true,
      "elementTypeParams": { "max_length": ID_MAX_LENGTH },
    }),
  };

  let mut fields = vec![id_field];
  fields.extend(schema.metadata_fields.iter().map(|field| {
    json!({
      "fieldName": field.name,
      "dataType": "VarChar",
      "elementTypeParams": { "max_length": field.max_length },
    })
  }));
  fields.push(json!({
    "fieldName": schema.vector_field,
    "dataType": "FloatVector",
    "elementTypeParams": { "dim": schema.dimension },
  }));

  json!({
    "collectionName": schema.name,
    "description": schema.description,
    "schema": {
      "autoId": false,
      "enableDynamicField": false,
      "fields": fields,
    },
  })
}

/// Cut `value` to at most `max` bytes without splitting a character
fn clip(value: &str, max: usize) -> &str {
  if value.len() <= max {
    return value;
  }
  let mut end = max;
  while !value.is_char_boundary(end) {
    end -= 1;
  }
  &value[..end]
}

fn entity(schema: &CollectionSchema, record: &EmbeddedRecord) -> Result<Value> {
  let mut row = Map::new();

  let id = match (schema.id_kind, record.id()) {
    (IdKind::Int64, RecordId::Int(id)) => json!(id),
    (IdKind::VarChar, id) => json!(id.to_string()),
    (IdKind::Int64, RecordId::Str(id)) => {
      return Err(SearchError::invalid_argument(format!(
        "collection '{}' has integer ids, got '{id}'",
        schema.name
      )));
    }
  };
  row.insert(schema.id_field.clone(), id);

  for field in &schema.metadata_fields {
    let value = record.metadata().get(&field.name).map(String::as_str).unwrap_or_default();
    row.insert(field.name.clone(), json!(clip(value, field.max_length)));
  }

  row.insert(schema.vector_field.clone(), json!(record.vector()));
  Ok(Value::Object(row))
}

fn parse_hit(row: &Value, request: &QueryRequest<'_>) -> Result<StoredMatch> {
  let raw_id = row
    .get(request.id_field)
    .or_else(|| row.get("id"))
    .ok_or_else(|| SearchError::upstream_rejected(SERVICE, "search hit without primary key"))?;

  let id = match raw_id {
    Value::Number(n) => n.as_i64().map(RecordId::Int),
    Value::String(s) => Some(RecordId::Str(s.clone())),
    _ => None,
  }
  .ok_or_else(|| SearchError::upstream_rejected(SERVICE, format!("unusable id {raw_id}")))?;

  let score = row
    .get("distance")
    .and_then(Value::as_f64)
    .ok_or_else(|| SearchError::upstream_rejected(SERVICE, "search hit without distance"))?;

  let metadata: Metadata = request
    .output_fields
    .iter()
    .filter_map(|field| {
      row.get(field).map(|value| {
        let text = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        (field.clone(), text)
      })
    })
    .collect();

  Ok(StoredMatch { id, metadata, score: score as f32 })
}

#[async_trait]
impl VectorStore for MilvusStore {
  fn service(&self) -> &str {
    SERVICE
  }

  async fn has_collection(&self, name: &str) -> Result<bool> {
    let data = self.call("collections/has", json!({ "collectionName": name })).await?;
    Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
  }

  async fn describe_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
    if !self.has_collection(name).await? {
      return Ok(None);
    }
    let data = self.call("collections/describe", json!({ "collectionName": name })).await?;
    parse_collection_info(&data).map(Some)
  }

  async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
    tracing::info!(collection = %schema.name, dimension = schema.dimension, "creating collection");
    self.call("collections/create", schema_body(schema)).await?;
    Ok(())
  }

  async fn count(&self, name: &str) -> Result<u64> {
    let data = self.call("collections/get_stats", json!({ "collectionName": name })).await?;
    Ok(data.get("rowCount").and_then(as_u64).unwrap_or(0))
  }

  async fn insert(&self, schema: &CollectionSchema, records: &[EmbeddedRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    let rows = records.iter().map(|record| entity(schema, record)).collect::<Result<Vec<_>>>()?;
    self
      .call("entities/upsert", json!({ "collectionName": schema.name, "data": rows }))
      .await?;
    Ok(())
  }

  async fn flush(&self, name: &str) -> Result<()> {
    self.call("collections/flush", json!({ "collectionName": name })).await?;
    Ok(())
  }

  async fn has_index(&self, name: &str, field: &str) -> Result<bool> {
    let data =
      self.call("indexes/list", json!({ "collectionName": name, "fieldName": field })).await?;
    Ok(data.as_array().is_some_and(|indexes| !indexes.is_empty()))
  }

  async fn create_index(
    &self,
    name: &str,
    field: &str,
    metric: Metric,
    params: &IndexParams,
  ) -> Result<()> {
    tracing::info!(collection = name, field, index_type = %params.index_type, "creating index");
    self
      .call(
        "indexes/create",
        json!({
          "collectionName": name,
          "indexParams": [{
            "metricType": metric_name(metric),
            "fieldName": field,
            "indexName": field,
            "params": { "index_type": params.index_type, "nlist": params.nlist },
          }],
        }),
      )
      .await?;
    Ok(())
  }

  async fn load(&self, name: &str) -> Result<()> {
    self.call("collections/load", json!({ "collectionName": name })).await?;
    Ok(())
  }

  async fn query(&self, name: &str, request: &QueryRequest<'_>) -> Result<Vec<StoredMatch>> {
    let data = self
      .call(
        "entities/search",
        json!({
          "collectionName": name,
          "data": [request.vector],
          "annsField": request.vector_field,
          "limit": request.top_k.min(MAX_LIMIT),
          "outputFields": request.output_fields,
          "searchParams": {
            "metricType": metric_name(request.metric),
            "params": { "nprobe": request.params.nprobe },
          },
        }),
      )
      .await?;

    data
      .as_array()
      .map(|rows| rows.iter().map(|row| parse_hit(row, request)).collect())
      .unwrap_or_else(|| Ok(Vec::new()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{FieldSpec, Record, ReportedMetric};
  use mockito::{Matcher, Server};

  fn schema(id_kind: IdKind) -> CollectionSchema {
    CollectionSchema {
      name: "movie_recommender".to_string(),
      id_field: "movieId".to_string(),
      id_kind,
      metadata_fields: vec![FieldSpec::new("title", 500), FieldSpec::new("genre", 1000)],
      vector_field: "embedding".to_string(),
      dimension: 3,
      metric: Metric::L2,
      description: "movies".to_string(),
    }
  }

  fn store(server: &Server) -> MilvusStore {
    MilvusStore::new(&server.url(), Some("root:Milvus".to_string()), Duration::from_secs(5))
      .unwrap()
  }

  #[tokio::test]
  async fn test_has_collection_sends_token() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/collections/has")
      .match_header("authorization", "Bearer root:Milvus")
      .match_body(Matcher::PartialJson(json!({ "collectionName": "movie_recommender" })))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"code":0,"data":{"has":true}}"#)
      .create_async()
      .await;

    assert!(store(&server).has_collection("movie_recommender").await.unwrap());
  }

  #[tokio::test]
  async fn test_describe_parses_dimension_and_metric() {
    let mut server = Server::new_async().await;
    let _has = server
      .mock("POST", "/v2/vectordb/collections/has")
      .with_body(r#"{"code":0,"data":{"has":true}}"#)
      .create_async()
      .await;
    let _describe = server
      .mock("POST", "/v2/vectordb/collections/describe")
      .with_body(
        r#"{"code":0,"data":{
          "collectionName":"movie_recommender",
          "fields":[
            {"name":"movieId","type":"Int64","primaryKey":true},
            {"name":"embedding","type":"FloatVector","params":[{"key":"dim","value":"384"}]}
          ],
          "indexes":[{"fieldName":"embedding","indexName":"embedding","metricType":"L2"}]
        }}"#,
      )
      .create_async()
      .await;

    let info = store(&server).describe_collection("movie_recommender").await.unwrap().unwrap();
    assert_eq!(info, CollectionInfo::new(384, Some(Metric::L2)));
  }

  #[tokio::test]
  async fn test_inner_product_index_conflicts_with_declared_metric() {
    let mut server = Server::new_async().await;
    let _has = server
      .mock("POST", "/v2/vectordb/collections/has")
      .with_body(r#"{"code":0,"data":{"has":true}}"#)
      .create_async()
      .await;
    let _describe = server
      .mock("POST", "/v2/vectordb/collections/describe")
      .with_body(
        r#"{"code":0,"data":{
          "fields":[{"name":"embedding","type":"FloatVector","params":[{"key":"dim","value":3}]}],
          "indexes":[{"fieldName":"embedding","metricType":"IP"}]
        }}"#,
      )
      .create_async()
      .await;

    let info = store(&server).describe_collection("movie_recommender").await.unwrap().unwrap();
    assert_eq!(info.metric, Some(ReportedMetric::Unsupported("IP".to_string())));

    match schema(IdKind::Int64).check_compatible(&info).unwrap_err() {
      SearchError::SchemaConflict { found, .. } => assert_eq!(found, "metric IP"),
      other => panic!("expected schema conflict, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_describe_missing_collection_is_none() {
    let mut server = Server::new_async().await;
    let _has = server
      .mock("POST", "/v2/vectordb/collections/has")
      .with_body(r#"{"code":0,"data":{"has":false}}"#)
      .create_async()
      .await;

    assert!(store(&server).describe_collection("ghost").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_create_collection_schema() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/v2/vectordb/collections/create")
      .match_body(Matcher::PartialJson(json!({
        "collectionName": "movie_recommender",
        "schema": {
          "autoId": false,
          "fields": [
            { "fieldName": "movieId", "dataType": "Int64", "isPrimary": true },
            {
              "fieldName": "title",
              "dataType": "VarChar",
              "elementTypeParams": { "max_length": 500 }
            },
            {
              "fieldName": "genre",
              "dataType": "VarChar",
              "elementTypeParams": { "max_length": 1000 }
            },
            {
              "fieldName": "embedding",
              "dataType": "FloatVector",
              "elementTypeParams": { "dim": 3 }
            }
          ]
        }
      })))
      .with_body(r#"{"code":0,"data":{}}"#)
      .create_async()
      .await;

    store(&server).create_collection(&schema(IdKind::Int64)).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_insert_builds_rows() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/v2/vectordb/entities/upsert")
      .match_body(Matcher::PartialJson(json!({
        "collectionName": "movie_recommender",
        "data": [{
          "movieId": 1,
          "title": "Toy Story",
          "genre": "Animation",
          "embedding": [0.5, 0.25, 0.0]
        }]
      })))
      .with_body(r#"{"code":0,"data":{"upsertCount":1}}"#)
      .create_async()
      .await;

    let record = Record::new(1, "Animation")
      .with_field("title", "Toy Story")
      .with_field("genre", "Animation");
    let embedded = EmbeddedRecord::new(record, vec![0.5, 0.25, 0.0], 3).unwrap();

    store(&server).insert(&schema(IdKind::Int64), &[embedded]).await.unwrap();
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_insert_rejects_string_id_for_integer_collection() {
    let server = Server::new_async().await;
    let embedded = EmbeddedRecord::new(Record::new("abc", "x"), vec![0.0; 3], 3).unwrap();

    let err = store(&server).insert(&schema(IdKind::Int64), &[embedded]).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidArgument { .. }));
  }

  #[tokio::test]
  async fn test_count_reads_row_count() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/collections/get_stats")
      .with_body(r#"{"code":0,"data":{"rowCount":"4999"}}"#)
      .create_async()
      .await;

    assert_eq!(store(&server).count("movie_recommender").await.unwrap(), 4999);
  }

  #[tokio::test]
  async fn test_search_preserves_store_order() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/entities/search")
      .match_body(Matcher::PartialJson(json!({
        "annsField": "embedding",
        "limit": 2,
        "searchParams": { "metricType": "L2", "params": { "nprobe": 10 } }
      })))
      .with_body(
        r#"{"code":0,"data":[
          {"movieId":42,"distance":0.12,"title":"Alien","genre":"Horror|Sci-Fi"},
          {"movieId":7,"distance":0.3,"title":"Heat","genre":"Action"}
        ]}"#,
      )
      .create_async()
      .await;

    let fields = vec!["title".to_string(), "genre".to_string()];
    let params = IndexParams::default();
    let request = QueryRequest {
      vector: &[0.1, 0.2, 0.3],
      top_k: 2,
      id_field: "movieId",
      vector_field: "embedding",
      output_fields: &fields,
      metric: Metric::L2,
      params: &params,
    };

    let hits = store(&server).query("movie_recommender", &request).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, RecordId::Int(42));
    assert_eq!(hits[0].metadata["title"], "Alien");
    assert!((hits[0].score - 0.12).abs() < 1e-6);
    assert_eq!(hits[1].id, RecordId::Int(7));
  }

  #[tokio::test]
  async fn test_search_limit_is_capped() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/v2/vectordb/entities/search")
      .match_body(Matcher::PartialJson(json!({ "limit": 16384 })))
      .with_body(r#"{"code":0,"data":[]}"#)
      .create_async()
      .await;

    let fields = vec!["title".to_string()];
    let params = IndexParams::default();
    let request = QueryRequest {
      vector: &[0.1, 0.2, 0.3],
      top_k: 1_000_000,
      id_field: "movieId",
      vector_field: "embedding",
      output_fields: &fields,
      metric: Metric::L2,
      params: &params,
    };

    assert!(store(&server).query("movie_recommender", &request).await.unwrap().is_empty());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_nonzero_code_is_rejection() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/collections/load")
      .with_body(r#"{"code":1100,"message":"index not found"}"#)
      .create_async()
      .await;

    let err = store(&server).load("movie_recommender").await.unwrap_err();
    assert!(matches!(err, SearchError::UpstreamRejected { .. }));
    assert!(err.to_string().contains("index not found"));
  }

  #[tokio::test]
  async fn test_missing_collection_maps_to_not_found() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/collections/get_stats")
      .with_body(r#"{"code":100,"message":"collection not found[collection=ghost]"}"#)
      .create_async()
      .await;

    let err = store(&server).count("ghost").await.unwrap_err();
    assert!(matches!(err, SearchError::CollectionNotFound { collection } if collection == "ghost"));
  }

  #[tokio::test]
  async fn test_server_error_is_retryable() {
    let mut server = Server::new_async().await;
    let _mock = server
      .mock("POST", "/v2/vectordb/collections/has")
      .with_status(503)
      .create_async()
      .await;

    let err = store(&server).has_collection("movie_recommender").await.unwrap_err();
    assert!(err.is_retryable());
  }

  #[tokio::test]
  async fn test_unreachable_server_is_unavailable() {
    let store =
      MilvusStore::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
    let err = store.has_collection("movie_recommender").await.unwrap_err();
    assert!(matches!(err, SearchError::UpstreamUnavailable { .. }));
  }

  #[test]
  fn test_clip_respects_char_boundaries() {
    assert_eq!(clip("abc", 5), "abc");
    assert_eq!(clip("abcdef", 3), "abc");
    assert_eq!(clip("ééé", 3), "é");
  }
}
