use bentley::*;
use serial_test::serial;

#[test]
fn test_basic_logging_functions() {
  // Logging functions must never panic, whatever the threshold
  info("Test info message");
  warn("Test warning message");
  error("Test error message");
  debug("Test debug message");
  verbose("Test verbose message");
  success("Test success message");
  event("Test event message");
  announce("Test section");
}

#[test]
fn test_multiline_messages() {
  let multiline_msg = "First line\nSecond line\nThird line";
  info(multiline_msg);
  warn(multiline_msg);
  error(multiline_msg);
}

#[test]
fn test_macros_accept_format_arguments() {
  let count = 3;
  bentley::info!("ingested {count} records");
  bentley::warn!("{} retries left", 2);
  bentley::success!("done");
  bentley::verbose!("collection {}", "movies");
}

#[test]
#[serial]
fn test_threshold_gates_levels() {
  set_level(Level::Warn);
  assert!(enabled(Level::Error));
  assert!(enabled(Level::Warn));
  assert!(!enabled(Level::Info));
  assert!(!enabled(Level::Debug));

  set_level(Level::Debug);
  assert!(enabled(Level::Verbose));
  assert_eq!(level(), Level::Debug);

  set_level(Level::Info);
}

#[test]
#[serial]
fn test_init_is_idempotent() {
  init(false);
  init(true);
  assert_eq!(level(), Level::Debug);
  set_level(Level::Info);
}
