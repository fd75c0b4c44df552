//! Rendering of plan, build and cache reports.
//!
//! Every command either emits its report as JSON or prints step lines, layer
//! lines and a closing [`Summary`].

use std::fmt::Display;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use abiforge_lib::cache::{LayerInfo, LayerStatus};

const SHORT_HASH_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  /// Prints `report` as pretty JSON when that format was requested.
  /// Returns whether it did, so text rendering can be skipped.
  pub fn emit_json<T: Serialize>(self, report: &T) -> anyhow::Result<bool> {
    if matches!(self, OutputFormat::Json) {
      let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
      println!("{json}");
      return Ok(true);
    }
    Ok(false)
  }
}

/// Where a step stands relative to the layer store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMark {
  /// A layer exists; the step will not run.
  Reused,
  /// No layer yet; the step will run.
  Pending,
  /// The step ran in this build.
  Built,
}

impl StepMark {
  pub fn glyph(self) -> &'static str {
    match self {
      StepMark::Reused => "=",
      StepMark::Pending => "+",
      StepMark::Built => "*",
    }
  }
}

fn short_hash(hash: &str) -> &str {
  &hash[..hash.len().min(SHORT_HASH_LEN)]
}

/// `#2 isolated nlplib (binary)  0a1b2c3d4e5f`
pub fn step_line(ordinal: usize, label: &str, hash: &str) -> String {
  format!("#{ordinal} {label}  {}", short_hash(hash))
}

pub fn print_step(mark: StepMark, ordinal: usize, label: &str, hash: &str) {
  let glyph = match mark {
    StepMark::Reused => mark.glyph().if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string(),
    StepMark::Pending => mark.glyph().if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    StepMark::Built => mark.glyph().if_supports_color(Stream::Stdout, |s| s.cyan()).to_string(),
  };
  println!("  {glyph} {}", step_line(ordinal, label, hash));
}

/// One `cache list` row. Layers without a usable marker show only their
/// hash and status.
pub fn layer_line(layer: &LayerInfo) -> String {
  let hash = short_hash(&layer.hash.0);
  match (&layer.status, &layer.marker) {
    (LayerStatus::Complete, Some(marker)) => {
      let created = UNIX_EPOCH + Duration::from_secs(marker.created_at_unix);
      format!(
        "{hash}  #{} {}  {}  {}",
        marker.ordinal,
        marker.label,
        format_size(layer.size_bytes),
        humantime::format_rfc3339_seconds(created)
      )
    }
    (status, _) => format!("{hash}  {}", status_word(*status)),
  }
}

fn status_word(status: LayerStatus) -> &'static str {
  match status {
    LayerStatus::Complete => "complete",
    LayerStatus::Incomplete => "incomplete (no marker)",
    LayerStatus::Corrupt => "corrupt (content changed)",
  }
}

pub fn print_layer(layer: &LayerInfo) {
  let line = layer_line(layer);
  if layer.status == LayerStatus::Complete {
    println!("  {line}");
  } else {
    println!("  {}", line.if_supports_color(Stream::Stdout, |s| s.yellow()));
  }
}

/// Layer sizes in binary units, one decimal above 1 KiB.
pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

/// Build and prune durations: milliseconds under a minute, whole seconds above.
pub fn format_elapsed(elapsed: Duration) -> String {
  let rounded = if elapsed.as_secs() >= 60 {
    Duration::from_secs(elapsed.as_secs())
  } else {
    Duration::from_millis(elapsed.as_millis() as u64)
  };
  humantime::format_duration(rounded).to_string()
}

pub fn print_heading(text: &str) {
  println!("{} {text}", "•".if_supports_color(Stream::Stdout, |s| s.blue()));
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    "✗".if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

/// Closing block of a text report: an optional headline and `label: value` rows.
#[derive(Debug, Default)]
pub struct Summary {
  done: Option<String>,
  rows: Vec<(&'static str, String)>,
}

impl Summary {
  pub fn done(headline: impl Into<String>) -> Self {
    Summary {
      done: Some(headline.into()),
      rows: Vec::new(),
    }
  }

  pub fn row(mut self, label: &'static str, value: impl Display) -> Self {
    self.rows.push((label, value.to_string()));
    self
  }

  pub fn print(&self) {
    match &self.done {
      Some(headline) => println!("{} {headline}", "✓".if_supports_color(Stream::Stdout, |s| s.green())),
      None => println!(),
    }
    for (label, value) in &self.rows {
      println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
    }
  }
}
