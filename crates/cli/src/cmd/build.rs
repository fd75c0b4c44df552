use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use abiforge_lib::cache::LayerCache;
use abiforge_lib::manifest::load_manifest;
use abiforge_lib::pipeline::{StepStatus, run_pipeline};
use abiforge_lib::platform::paths::store_dir;
use abiforge_lib::store_lock::{StoreLock, StoreUse};

use crate::output::{OutputFormat, StepMark, Summary, format_elapsed, print_heading, print_step};

pub fn cmd_build(manifest_path: &Path, out: &Path, output: OutputFormat) -> Result<()> {
  let manifest = load_manifest(manifest_path).with_context(|| format!("Failed to load {}", manifest_path.display()))?;

  let store = store_dir();
  debug!(store = %store.display(), manifest = %manifest_path.display(), "using layer store");
  let _lock = StoreLock::acquire(&store, StoreUse::Build).context("Failed to acquire store lock")?;
  let cache = LayerCache::open(&store).context("Failed to open layer store")?;

  let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
  let report = runtime
    .block_on(run_pipeline(&manifest, &cache, out))
    .context("Build failed")?;

  if output.emit_json(&report.image)? {
    return Ok(());
  }

  if !report.image.steps.is_empty() {
    print_heading("Steps:");
    for step in &report.image.steps {
      let mark = match step.status {
        StepStatus::Cached => StepMark::Reused,
        StepStatus::Executed => StepMark::Built,
      };
      print_step(mark, step.ordinal, &step.label, &step.hash.0);
    }
    println!();
  }

  Summary::done("Build complete!")
    .row("Executed", report.executed)
    .row("Cached", report.cached)
    .row("Root filesystem", report.rootfs().display())
    .row("Image record", report.record_path().display())
    .row("Duration", format_elapsed(report.duration))
    .print();

  Ok(())
}
