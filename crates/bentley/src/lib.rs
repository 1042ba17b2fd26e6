//! Bentley - console logging for the semsearch tools
//!
//! ## Features
//!
//! - Levelled logging (error, warn, info, verbose, debug) with a global threshold
//! - Coloured, fixed-width prefixes; every line of a multi-line message is prefixed
//! - Timestamped event lines for long-running steps
//! - Banner output for section headers
//! - `init()` wires up `tracing-subscriber` so library `tracing` events share the same verbosity
//!
//! All output goes to stderr, leaving stdout for results.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Local;
use colored::*;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Verbosity threshold, ordered from quietest to noisiest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
  Error = 0,
  Warn = 1,
  Info = 2,
  Verbose = 3,
  Debug = 4,
}

impl Level {
  fn from_u8(value: u8) -> Self {
    match value {
      0 => Level::Error,
      1 => Level::Warn,
      2 => Level::Info,
      3 => Level::Verbose,
      _ => Level::Debug,
    }
  }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Set the global verbosity threshold
pub fn set_level(level: Level) {
  THRESHOLD.store(level as u8, Ordering::Relaxed);
}

/// Current global verbosity threshold
pub fn level() -> Level {
  Level::from_u8(THRESHOLD.load(Ordering::Relaxed))
}

/// Whether a message at `level` would be printed
pub fn enabled(level: Level) -> bool {
  level <= self::level()
}

/// Force colours on or off, regardless of terminal detection
pub fn set_color(enabled: bool) {
  colored::control::set_override(enabled);
}

/// Initialize console logging and the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise HTTP plumbing stays at `warn` and the
/// caller's crates follow the verbose flag. Safe to call more than once.
pub fn init(verbose: bool) {
  set_level(if verbose { Level::Debug } else { Level::Info });

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("debug,hyper=warn,hyper_util=warn,reqwest=info,rustls=warn,h2=warn")
    } else {
      EnvFilter::new("semsearch=warn,warn")
    }
  });

  let _ = tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(filter)
    .try_init();
}

/// Format a colored prefix for log messages
fn format_prefix(color: Color, prefix: &str) -> String {
  format!("[{}]{:<width$}", prefix.color(color).bold(), "", width = 7 - prefix.len() - 2)
}

/// Prefix every line of `message`
pub fn format_lines(color: Color, tag: &str, message: &str) -> Vec<String> {
  let prefix = format_prefix(color, tag);
  message.lines().map(|line| format!("{prefix} {line}")).collect()
}

fn emit(level: Level, color: Color, tag: &str, message: &str) {
  if !enabled(level) {
    return;
  }
  for line in format_lines(color, tag, message) {
    eprintln!("{line}");
  }
}

pub fn verbose(message: &str) {
  emit(Level::Verbose, Color::Cyan, "verb", message);
}

/// Info level logging - general information
pub fn info(message: &str) {
  emit(Level::Info, Color::Blue, "info", message);
}

/// Warning level logging - something needs attention
pub fn warn(message: &str) {
  emit(Level::Warn, Color::Yellow, "warn", message);
}

/// Error level logging - something went wrong
pub fn error(message: &str) {
  emit(Level::Error, Color::Red, "error", message);
}

/// Debug level logging - detailed diagnostic information
pub fn debug(message: &str) {
  emit(Level::Debug, Color::Magenta, "debug", message);
}

/// Success level logging - something completed successfully
pub fn success(message: &str) {
  emit(Level::Info, Color::Green, "sccs", message);
}

/// Timestamped event line, printed at info level
pub fn event(message: &str) {
  if !enabled(Level::Info) {
    return;
  }
  let timestamp = Local::now().format("%H:%M:%S").to_string();
  let prefix = format!("[{}] [{}]", "event".blue().bold(), timestamp.cyan());
  for line in message.lines() {
    eprintln!("{prefix} {line}");
  }
}

/// Create a banner line of the specified length and character
pub fn banner_line(length: usize, char: char) -> String {
  char.to_string().repeat(length)
}

/// Section header framed by banner lines
pub fn announce(message: &str) {
  if !enabled(Level::Info) {
    return;
  }
  let width = message.chars().count().clamp(20, 72);
  let banner = banner_line(width, '-');
  eprintln!("{}", banner.blue().bold());
  eprintln!("{}", message.blue().bold());
  eprintln!("{}", banner.blue().bold());
}

/// Logging macros accept `format!`-style arguments
#[macro_export]
macro_rules! info {
  ($($arg:tt)*) => {
    $crate::info(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! warn {
  ($($arg:tt)*) => {
    $crate::warn(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! error {
  ($($arg:tt)*) => {
    $crate::error(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! verbose {
  ($($arg:tt)*) => {
    $crate::verbose(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! debug {
  ($($arg:tt)*) => {
    $crate::debug(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! success {
  ($($arg:tt)*) => {
    $crate::success(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! event {
  ($($arg:tt)*) => {
    $crate::event(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}

#[macro_export]
macro_rules! announce {
  ($($arg:tt)*) => {
    $crate::announce(&format!($($arg)*)) // LCOV_EXCL_LINE
  };
}
