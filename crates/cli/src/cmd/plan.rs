use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use abiforge_lib::cache::LayerCache;
use abiforge_lib::manifest::load_manifest;
use abiforge_lib::plan::{BuildStep, plan};
use abiforge_lib::platform::paths::store_dir;
use abiforge_lib::store_lock::{StoreLock, StoreUse};

use crate::output::{OutputFormat, StepMark, Summary, print_heading, print_step};

#[derive(Serialize)]
struct PlannedStep<'a> {
  #[serde(flatten)]
  step: &'a BuildStep,
  label: String,
  cached: bool,
}

pub fn cmd_plan(manifest_path: &Path, output: OutputFormat) -> Result<()> {
  let manifest = load_manifest(manifest_path).with_context(|| format!("Failed to load {}", manifest_path.display()))?;
  let steps = plan(&manifest)?;

  let store = store_dir();
  debug!(store = %store.display(), manifest = %manifest_path.display(), "using layer store");
  let _lock = StoreLock::acquire(&store, StoreUse::Plan).context("Failed to acquire store lock")?;
  let cache = LayerCache::open(&store).context("Failed to open layer store")?;

  let planned: Vec<PlannedStep> = steps
    .iter()
    .map(|step| PlannedStep {
      step,
      label: step.label(),
      cached: cache.is_cached(&step.hash),
    })
    .collect();

  if output.emit_json(&planned)? {
    return Ok(());
  }

  if planned.is_empty() {
    print_heading("Nothing to build");
    return Ok(());
  }

  print_heading(&format!("Build plan ({} steps):", planned.len()));
  for p in &planned {
    let mark = if p.cached { StepMark::Reused } else { StepMark::Pending };
    print_step(mark, p.step.ordinal, &p.label, &p.step.hash.0);
  }

  let cached = planned.iter().filter(|p| p.cached).count();
  Summary::default()
    .row("Cached", cached)
    .row("To execute", planned.len() - cached)
    .print();

  Ok(())
}
