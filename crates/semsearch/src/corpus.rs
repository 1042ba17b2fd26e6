//! Dataset loading and cleaning

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use crate::error::{Result, SearchError};
use crate::model::Record;

/// One row of the movies dataset. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct MovieRow {
  #[serde(rename = "movieId")]
  movie_id: i64,
  #[serde(default)]
  title: Option<String>,
  #[serde(default, alias = "genres")]
  genre: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusLoader {
  cap: usize,
}

impl CorpusLoader {
  /// `cap` bounds how many cleaned records are kept
  pub fn new(cap: usize) -> Self {
    Self { cap }
  }

  pub fn movies_from_path(&self, path: &Path) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path)
      .map_err(|e| SearchError::corpus(format!("cannot open {}: {e}", path.display())))?;
    self.movies(file)
  }

  /// Parse and clean a movies CSV (`movieId,title,genre`).
  ///
  /// Rows with an empty title or genre are dropped, later duplicates of a
  /// title are dropped, and at most `cap` rows are kept. The genre string is
  /// the embedded text; title and genre are kept as metadata.
  pub fn movies<R: Read>(&self, reader: R) -> Result<Vec<Record>> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut seen_titles = HashSet::new();
    let mut records = Vec::new();

    for (index, row) in csv.deserialize::<MovieRow>().enumerate() {
      if records.len() >= self.cap {
        break;
      }

      // Header is line 1
      let row = row.map_err(|e| SearchError::corpus(format!("row {}: {e}", index + 2)))?;
      let (Some(title), Some(genre)) = (non_empty(row.title), non_empty(row.genre)) else {
        continue;
      };
      if !seen_titles.insert(title.clone()) {
        continue;
      }

      records.push(
        Record::new(row.movie_id, genre.clone())
          .with_field("title", title)
          .with_field("genre", genre),
      );
    }

    bentley::verbose!("Loaded {} movies", records.len());
    Ok(records)
  }

  /// Wrap free-text notes as records `note-1`, `note-2`, ...
  pub fn notes(&self, notes: &[&str]) -> Vec<Record> {
    notes
      .iter()
      .take(self.cap)
      .enumerate()
      .map(|(i, note)| Record::new(format!("note-{}", i + 1), *note).with_field("text", *note))
      .collect()
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}
