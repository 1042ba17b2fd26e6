//! The two bundled demonstrations wired end to end
//!
//! `movies` recommends films by genre from a CSV dataset; `notes` finds
//! personal notes by meaning. Both share the same ingest/query pipelines and
//! differ only in corpus, schema and queries.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, Profile};
use crate::corpus::CorpusLoader;
use crate::display::ResultPresenter;
use crate::embedding::{self, Embedder};
use crate::error::Result;
use crate::model::{CollectionSchema, FieldSpec, IdKind, Record, SearchResult};
use crate::pipeline::{IngestPipeline, IngestReport, QueryPipeline};
use crate::store::{self, VectorStore};

pub const NOTES: [&str; 5] = [
  "The best way to learn a new programming language is to build a pet project.",
  "Remember to buy milk and eggs on the way home.",
  "Carbonara pasta recipe: spaghetti, guanciale, eggs, pecorino cheese, black pepper.",
  "Vacation ideas: go to the mountains or relax by the sea.",
  "Quantum computers could revolutionize the world of computation.",
];

pub const MOVIE_QUERIES: [&str; 2] = ["Action|Thriller|Sci-Fi", "Animation|Children|Comedy"];

pub const NOTE_QUERIES: [&str; 3] =
  ["What should I cook for dinner?", "How can I learn effectively?", "Where to go for a trip?"];

pub fn queries_for(profile: Profile) -> &'static [&'static str] {
  match profile {
    Profile::Movies => &MOVIE_QUERIES,
    Profile::Notes => &NOTE_QUERIES,
  }
}

/// Collection layout for a profile
pub fn schema_for(profile: Profile, config: &Config) -> CollectionSchema {
  match profile {
    Profile::Movies => CollectionSchema {
      name: config.collection.clone(),
      id_field: "movieId".to_string(),
      id_kind: if config.content_hash_ids { IdKind::VarChar } else { IdKind::Int64 },
      metadata_fields: vec![FieldSpec::new("title", 500), FieldSpec::new("genre", 1000)],
      vector_field: "embedding".to_string(),
      dimension: config.dimension,
      metric: config.metric,
      description: "Movie recommendation collection".to_string(),
    },
    Profile::Notes => CollectionSchema {
      name: config.collection.clone(),
      id_field: "id".to_string(),
      id_kind: IdKind::VarChar,
      metadata_fields: vec![FieldSpec::new("text", 2000)],
      vector_field: "embedding".to_string(),
      dimension: config.dimension,
      metric: config.metric,
      description: "Personal notes".to_string(),
    },
  }
}

/// Outcome of running a list of queries
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueryRun {
  pub succeeded: usize,
  pub failed: usize,
}

/// A connected profile: one embedder and one store shared by both pipelines
pub struct Demo {
  profile: Profile,
  config: Config,
  store: Arc<dyn VectorStore>,
  ingest: IngestPipeline,
  query: QueryPipeline,
  presenter: ResultPresenter,
}

impl Demo {
  /// Build the embedder and store described by `config`
  pub async fn connect(
    profile: Profile,
    config: Config,
    presenter: ResultPresenter,
  ) -> Result<Self> {
    let embedder = embedding::build(&config).await?;
    let store = store::connect(&config)?;
    Self::from_parts(profile, config, embedder, store, presenter)
  }

  pub fn from_parts(
    profile: Profile,
    config: Config,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    presenter: ResultPresenter,
  ) -> Result<Self> {
    let schema = schema_for(profile, &config);
    let ingest = IngestPipeline::new(embedder.clone(), store.clone(), schema.clone())?
      .with_index_params(config.index.clone())
      .with_batch_size(config.insert_batch_size)
      .with_content_hash_ids(config.content_hash_ids);
    let query =
      QueryPipeline::new(embedder, store.clone(), schema, config.index.clone(), config.top_k)?;

    Ok(Self { profile, config, store, ingest, query, presenter })
  }

  /// Display fields for a profile
  pub fn display_fields(profile: Profile) -> Vec<String> {
    match profile {
      Profile::Movies => vec!["title".to_string(), "genre".to_string()],
      Profile::Notes => vec!["text".to_string()],
    }
  }

  /// Load the profile's corpus; `dataset` is only read for movies
  pub fn corpus(&self, dataset: &Path) -> Result<Vec<Record>> {
    let loader = CorpusLoader::new(self.config.corpus_cap);
    match self.profile {
      Profile::Movies => loader.movies_from_path(dataset),
      Profile::Notes => Ok(loader.notes(&NOTES)),
    }
  }

  /// Populate the collection once; `force` re-embeds and upserts regardless
  pub async fn ingest(&self, dataset: &Path, force: bool) -> Result<IngestReport> {
    let records = self.corpus(dataset)?;
    if force {
      self.ingest.reingest(records).await
    } else {
      self.ingest.ingest(records).await
    }
  }

  pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SearchResult>> {
    self.query.search(query, top_k.unwrap_or(self.query.default_top_k())).await
  }

  /// Run and print every query; a failing query is reported and the rest still run
  pub async fn run_queries<W: Write>(
    &self,
    out: &mut W,
    queries: &[&str],
  ) -> std::io::Result<QueryRun> {
    let mut run = QueryRun::default();
    for query in queries {
      match self.search(query, None).await {
        Ok(results) => {
          writeln!(out)?;
          self.presenter.render_to(out, query, &results)?;
          run.succeeded += 1;
        }
        Err(error) => {
          bentley::error!("Query '{}' failed: {}", query, error);
          run.failed += 1;
        }
      }
    }
    Ok(run)
  }

  /// Whether the collection exists, and how many entities it holds
  pub async fn stats(&self) -> Result<Option<u64>> {
    let name = &self.config.collection;
    if !self.store.has_collection(name).await? {
      return Ok(None);
    }
    self.store.count(name).await.map(Some)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn presenter(&self) -> &ResultPresenter {
    &self.presenter
  }
}
