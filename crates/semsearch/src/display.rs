//! Rendering of ranked search results

use colored::*;
use std::io::Write;

use crate::model::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
  Plain,
  Colored,
}

/// Turns ranked results into the lines printed for a query
#[derive(Debug, Clone)]
pub struct ResultPresenter {
  fields: Vec<String>,
  style: Style,
}

impl ResultPresenter {
  /// `fields` are the metadata keys to print, in order
  pub fn new(fields: Vec<String>, style: Style) -> Self {
    Self { fields, style }
  }

  pub fn plain(fields: Vec<String>) -> Self {
    Self::new(fields, Style::Plain)
  }

  pub fn render(&self, query: &str, results: &[SearchResult]) -> String {
    let mut out = String::new();
    out.push_str(&self.header(query));
    out.push('\n');

    if results.is_empty() {
      out.push_str(&self.paint_empty("  No matches found."));
      out.push('\n');
      return out;
    }

    for result in results {
      out.push_str(&self.line(query, result));
      out.push('\n');
    }
    out
  }

  pub fn render_to<W: Write>(
    &self,
    writer: &mut W,
    query: &str,
    results: &[SearchResult],
  ) -> std::io::Result<()> {
    writer.write_all(self.render(query, results).as_bytes())?;
    writer.flush()
  }

  fn header(&self, query: &str) -> String {
    let header = format!("Results for '{query}':");
    match self.style {
      Style::Plain => header,
      Style::Colored => header.cyan().bold().to_string(),
    }
  }

  fn paint_empty(&self, text: &str) -> String {
    match self.style {
      Style::Plain => text.to_string(),
      Style::Colored => text.red().to_string(),
    }
  }

  fn line(&self, query: &str, result: &SearchResult) -> String {
    let mut parts: Vec<String> = self
      .fields
      .iter()
      .filter_map(|field| {
        result.metadata.get(field).map(|value| {
          let value = match self.style {
            Style::Plain => value.clone(),
            Style::Colored => highlight_terms(value, query),
          };
          format!("{}: {}", capitalize(field), value)
        })
      })
      .collect();

    if parts.is_empty() {
      parts.push(format!("Id: {}", result.record_id));
    }

    let score = format!("{}: {:.4}", result.metric.score_label(), result.score);
    let score = match self.style {
      Style::Plain => score,
      Style::Colored => score.yellow().to_string(),
    };
    parts.push(score);

    format!("  {}. {}", result.rank, parts.join(" | "))
  }
}

fn capitalize(field: &str) -> String {
  let mut chars = field.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

/// Bold the words of `query` (3+ letters) wherever they appear in `text`
fn highlight_terms(text: &str, query: &str) -> String {
  let mut terms: Vec<String> = query
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| t.len() >= 3)
    .map(str::to_ascii_lowercase)
    .collect();
  terms.sort_by_key(|t| std::cmp::Reverse(t.len()));

  // ASCII lowering keeps byte offsets aligned with `text`
  let lowered = text.to_ascii_lowercase();
  let mut marked = vec![false; text.len()];
  for term in &terms {
    for (start, _) in lowered.match_indices(term.as_str()) {
      marked[start..start + term.len()].iter_mut().for_each(|m| *m = true);
    }
  }

  let mut out = String::new();
  let mut run_start = 0;
  let mut run_marked = false;
  for (i, _) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
    let is_marked = i < text.len() && marked[i];
    if i == text.len() || is_marked != run_marked {
      let segment = &text[run_start..i];
      if run_marked {
        out.push_str(&segment.bold().to_string());
      } else {
        out.push_str(segment);
      }
      run_start = i;
      run_marked = is_marked;
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Metadata, Metric, RecordId};

  fn result(rank: usize, fields: &[(&str, &str)], score: f32, metric: Metric) -> SearchResult {
    let metadata: Metadata =
      fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    SearchResult { rank, record_id: RecordId::Int(rank as i64), metadata, score, metric }
  }

  fn movie_presenter() -> ResultPresenter {
    ResultPresenter::plain(vec!["title".to_string(), "genre".to_string()])
  }

  #[test]
  fn test_movie_lines() {
    let results = vec![
      result(
        1,
        &[("title", "Heat (1995)"), ("genre", "Action|Crime|Thriller")],
        0.41234,
        Metric::L2,
      ),
      result(2, &[("title", "Alien (1979)"), ("genre", "Horror|Sci-Fi")], 0.5, Metric::L2),
    ];

    let rendered = movie_presenter().render("Action|Thriller|Sci-Fi", &results);
    assert_eq!(
      rendered,
      "Results for 'Action|Thriller|Sci-Fi':\n\
       \x20 1. Title: Heat (1995) | Genre: Action|Crime|Thriller | Distance: 0.4123\n\
       \x20 2. Title: Alien (1979) | Genre: Horror|Sci-Fi | Distance: 0.5000\n"
    );
  }

  #[test]
  fn test_cosine_label() {
    let presenter = ResultPresenter::plain(vec!["text".to_string()]);
    let results = vec![result(1, &[("text", "Carbonara pasta recipe")], 0.87654, Metric::Cosine)];

    let rendered = presenter.render("What should I cook for dinner?", &results);
    assert!(rendered.contains("  1. Text: Carbonara pasta recipe | Similarity: 0.8765"));
  }

  #[test]
  fn test_empty_results() {
    let rendered = movie_presenter().render("Western", &[]);
    assert_eq!(rendered, "Results for 'Western':\n  No matches found.\n");
  }

  #[test]
  fn test_missing_fields_fall_back_to_id() {
    let results = vec![result(1, &[], 1.0, Metric::L2)];
    let rendered = movie_presenter().render("x", &results);
    assert!(rendered.contains("  1. Id: 1 | Distance: 1.0000"));
  }

  #[test]
  fn test_render_to_writer() {
    let mut buffer = Vec::new();
    movie_presenter().render_to(&mut buffer, "Western", &[]).unwrap();
    assert!(String::from_utf8(buffer).unwrap().contains("No matches found."));
  }

  #[test]
  fn test_highlight_keeps_text() {
    colored::control::set_override(false);
    assert_eq!(highlight_terms("Action|Crime", "action"), "Action|Crime");
    assert_eq!(highlight_terms("Café", "caf"), "Café");
  }

  #[test]
  fn test_capitalize() {
    assert_eq!(capitalize("title"), "Title");
    assert_eq!(capitalize(""), "");
  }
}
