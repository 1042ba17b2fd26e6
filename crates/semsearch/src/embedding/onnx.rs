//! Local sentence-transformer inference through ONNX Runtime
//!
//! Downloads `tokenizer.json` and `onnx/model.onnx` from the Hugging Face hub
//! on first use (cached afterwards), then mean-pools the last hidden state.

use async_trait::async_trait;
use hf_hub::api::tokio::Api;
use ndarray::Array2;
use ort::{session::Session, value::Value};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};

use super::{mean_pool, normalize, Embedder};
use crate::error::{Result, SearchError};

const TOKENIZER_FILE: &str = "tokenizer.json";
const MODEL_FILE: &str = "onnx/model.onnx";
const MAX_TOKENS: usize = 256;

fn model_error(model: &str, error: impl Display) -> SearchError {
  SearchError::upstream_rejected(model, error.to_string())
}

struct OnnxModel {
  name: String,
  session: Session,
  tokenizer: Tokenizer,
}

impl OnnxModel {
  fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
    let encoding =
      self.tokenizer.encode(text, true).map_err(|e| model_error(&self.name, e))?;

    let mut inputs: HashMap<String, Value> = HashMap::new();
    inputs.insert("input_ids".to_string(), self.tensor(encoding.get_ids())?);
    inputs.insert("attention_mask".to_string(), self.tensor(encoding.get_attention_mask())?);
    if self.session.inputs.iter().any(|input| input.name == "token_type_ids") {
      inputs.insert("token_type_ids".to_string(), self.tensor(encoding.get_type_ids())?);
    }

    let name = self.name.clone();
    let outputs = self.session.run(inputs).map_err(|e| model_error(&name, e))?;
    let hidden = outputs
      .get("last_hidden_state")
      .or_else(|| outputs.get("0"))
      .ok_or_else(|| model_error(&name, "model produced no last_hidden_state output"))?;

    let (shape, data) = hidden.try_extract_tensor::<f32>().map_err(|e| model_error(&name, e))?;
    let shape: &[i64] = shape.as_ref();
    let hidden_size = shape.last().copied().unwrap_or(0) as usize;
    if hidden_size == 0 {
      return Err(model_error(&name, "model output has no hidden dimension"));
    }

    Ok(normalize(mean_pool(data, encoding.get_attention_mask(), hidden_size)))
  }

  fn tensor(&self, values: &[u32]) -> Result<Value> {
    let widened: Vec<i64> = values.iter().map(|&v| i64::from(v)).collect();
    let array = Array2::from_shape_vec((1, widened.len()), widened)
      .map_err(|e| model_error(&self.name, e))?;
    Ok(Value::from_array(array).map_err(|e| model_error(&self.name, e))?.into())
  }
}

pub struct OnnxEmbedder {
  name: String,
  dimension: usize,
  model: Arc<Mutex<OnnxModel>>,
}

impl OnnxEmbedder {
  /// Fetch (or reuse the cached copy of) `repo` and load it
  pub async fn load(repo: &str) -> Result<Self> {
    bentley::info!("Loading embedding model {}...", repo);
    let (tokenizer_path, model_path) = download(repo).await?;

    let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| model_error(repo, e))?;
    tokenizer
      .with_truncation(Some(TruncationParams { max_length: MAX_TOKENS, ..Default::default() }))
      .map_err(|e| model_error(repo, e))?;

    let session = Session::builder()
      .and_then(|builder| builder.commit_from_file(&model_path))
      .map_err(|e| model_error(repo, e))?;

    let mut model = OnnxModel { name: repo.to_string(), session, tokenizer };
    let dimension = model.embed("dimension probe")?.len();
    bentley::success!("Model {} ready ({} dims)", repo, dimension);

    Ok(Self { name: repo.to_string(), dimension, model: Arc::new(Mutex::new(model)) })
  }
}

async fn download(repo: &str) -> Result<(PathBuf, PathBuf)> {
  let api = Api::new().map_err(|e| model_error(repo, format!("hub client: {e}")))?;
  let repository = api.model(repo.to_string());

  let tokenizer = repository
    .get(TOKENIZER_FILE)
    .await
    .map_err(|e| SearchError::upstream_unavailable(repo, format!("tokenizer download: {e}")))?;
  let model = repository
    .get(MODEL_FILE)
    .await
    .map_err(|e| SearchError::upstream_unavailable(repo, format!("model download: {e}")))?;

  Ok((tokenizer, model))
}

#[async_trait]
impl Embedder for OnnxEmbedder {
  fn model_name(&self) -> &str {
    &self.name
  }

  fn dimension(&self) -> usize {
    self.dimension
  }

  async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = Arc::clone(&self.model);
    let texts = texts.to_vec();
    let name = self.name.clone();

    tokio::task::spawn_blocking(move || {
      let mut model = model.lock().map_err(|_| model_error(&name, "model lock poisoned"))?;
      texts.iter().map(|text| model.embed(text)).collect::<Result<Vec<_>>>()
    })
    .await
    .map_err(|e| model_error(&self.name, e))?
  }
}
