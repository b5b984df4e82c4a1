//! Terminal output for the stagehand commands.
//!
//! Status lines go to stdout, problems to stderr. Colors are only used when
//! the stream supports them, so piped output stays plain.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

/// Markers used when listing plan and image contents.
pub mod symbols {
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const PLUS: &str = "+";
}

const SUCCESS: &str = "✓";
const ERROR: &str = "✗";
const WARNING: &str = "⚠";

/// Hashes are shown by their first 12 characters.
pub fn truncate_hash(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    0 => format!("{}ms", duration.subsec_millis()),
    1..60 => format!("{:.2}s", duration.as_secs_f64()),
    _ => format!("{}m {}s", secs / 60, secs % 60),
  }
}

pub fn print_success(message: &str) {
  println!("{} {}", SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()), message);
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!("{} {}", symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()), message);
}

/// An indented `label: value` line.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// A blank line and a bold heading.
pub fn print_section(title: &str) {
  println!();
  println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
