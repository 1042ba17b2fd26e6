//! Command implementations behind the `semsearch` binary

use anyhow::{anyhow, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{Backend, Config, Profile};
use crate::demo::{queries_for, Demo};
use crate::display::{ResultPresenter, Style};
use crate::pipeline::IngestReport;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
  pub config: Option<PathBuf>,
  pub offline: bool,
  pub color: bool,
}

fn load_config(profile: Profile, options: &GlobalOptions) -> Result<Config> {
  let offline = options.offline;
  let config = Config::load_with(profile, options.config.as_deref(), |config| {
    if offline {
      config.go_offline();
    }
  })?;
  bentley::verbose!(
    "Profile {}: {:?} store, collection '{}', {:?} embedder",
    profile,
    config.backend,
    config.collection,
    config.embedder.kind
  );
  Ok(config)
}

async fn connect(profile: Profile, options: &GlobalOptions) -> Result<Demo> {
  let config = load_config(profile, options)?;
  let style = if options.color { Style::Colored } else { Style::Plain };
  let presenter = ResultPresenter::new(Demo::display_fields(profile), style);
  Ok(Demo::connect(profile, config, presenter).await?)
}

fn report_ingest(report: IngestReport) {
  match report {
    IngestReport::Populated { inserted } => {
      bentley::success!("Ingestion done: {} records", inserted)
    }
    IngestReport::AlreadyPopulated { existing } => {
      bentley::info!("Collection already populated ({} records), skipped ingestion", existing)
    }
  }
}

/// Full demonstration: ingest once, then run the profile's queries
pub async fn run_demo(profile: Profile, dataset: &Path, options: &GlobalOptions) -> Result<()> {
  bentley::announce!("semsearch: {} demo", profile);

  let demo = connect(profile, options).await?;
  let report = demo.ingest(dataset, false).await?;
  report_ingest(report);

  let queries = queries_for(profile);
  let mut stdout = std::io::stdout();
  let run = demo.run_queries(&mut stdout, queries).await?;
  stdout.flush()?;

  if run.failed > 0 {
    return Err(anyhow!("{} of {} queries failed", run.failed, queries.len()));
  }
  bentley::event!("Answered {} queries", run.succeeded);
  Ok(())
}

pub async fn ingest(
  profile: Profile,
  dataset: &Path,
  force: bool,
  options: &GlobalOptions,
) -> Result<()> {
  let demo = connect(profile, options).await?;
  if force {
    bentley::warn!("Forcing re-ingestion into '{}'", demo.config().collection);
  }
  report_ingest(demo.ingest(dataset, force).await?);
  Ok(())
}

pub async fn search(
  profile: Profile,
  query: &str,
  top_k: Option<usize>,
  dataset: &Path,
  options: &GlobalOptions,
) -> Result<()> {
  let demo = connect(profile, options).await?;

  // Nothing survives between runs in memory, so build the corpus first
  if demo.config().backend == Backend::Memory {
    demo.ingest(dataset, false).await?;
  }

  let results = demo.search(query, top_k).await?;
  demo.presenter().render_to(&mut std::io::stdout().lock(), query, &results)?;
  Ok(())
}

pub async fn stats(profile: Profile, options: &GlobalOptions) -> Result<()> {
  let demo = connect(profile, options).await?;
  let collection = &demo.config().collection;

  match demo.stats().await? {
    Some(count) => println!("Collection '{collection}': {count} entities"),
    None => println!("Collection '{collection}' does not exist"),
  }
  Ok(())
}
