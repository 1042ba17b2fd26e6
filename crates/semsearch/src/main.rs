use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use semsearch::commands::{self, GlobalOptions};
use semsearch::config::Profile;

#[derive(Parser)]
#[command(name = "semsearch")]
#[command(
  about = "Semantic search over a vector database\nEmbed a corpus once, then query it by meaning"
)]
#[command(version)]
struct Cli {
  /// YAML configuration file
  #[arg(long, global = true, env = "SEMSEARCH_CONFIG")]
  config: Option<PathBuf>,

  /// Use the in-process store and hashing embedder; no services needed
  #[arg(long, global = true)]
  offline: bool,

  /// Show debug output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Disable coloured output
  #[arg(long, global = true)]
  no_color: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args)]
struct Dataset {
  /// Movies CSV (movieId,title,genre); ignored by the notes profile
  #[arg(long, default_value = "movies.csv")]
  dataset: PathBuf,
}

#[derive(Subcommand)]
enum Command {
  /// Recommend movies by genre (ingests the dataset on first run)
  Movies {
    #[command(flatten)]
    dataset: Dataset,
  },
  /// Find personal notes by meaning
  Notes,
  /// Populate a profile's collection without querying
  Ingest {
    #[arg(short, long, value_enum)]
    profile: Profile,
    #[command(flatten)]
    dataset: Dataset,
    /// Re-embed and upsert even if the collection already holds data
    #[arg(short, long)]
    force: bool,
  },
  /// Run one ad-hoc query
  Search {
    #[arg(short, long, value_enum)]
    profile: Profile,
    /// Query text
    query: String,
    /// Number of results (defaults to the profile's top_k)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
    #[command(flatten)]
    dataset: Dataset,
  },
  /// Show whether the collection exists and how many entities it holds
  Stats {
    #[arg(short, long, value_enum)]
    profile: Profile,
  },
}

async fn handle(command: Command, options: &GlobalOptions) -> Result<()> {
  match command {
    Command::Movies { dataset } => {
      commands::run_demo(Profile::Movies, &dataset.dataset, options).await
    }
    Command::Notes => commands::run_demo(Profile::Notes, &PathBuf::new(), options).await,
    Command::Ingest { profile, dataset, force } => {
      commands::ingest(profile, &dataset.dataset, force, options).await
    }
    Command::Search { profile, query, top_k, dataset } => {
      commands::search(profile, &query, top_k, &dataset.dataset, options).await
    }
    Command::Stats { profile } => commands::stats(profile, options).await,
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  let cli = Cli::parse();

  bentley::init(cli.verbose);
  if cli.no_color {
    bentley::set_color(false);
  }

  let options = GlobalOptions { config: cli.config, offline: cli.offline, color: !cli.no_color };
  if let Err(error) = handle(cli.command, &options).await {
    bentley::error!("{:#}", error);
    std::process::exit(1);
  }
  Ok(())
}
