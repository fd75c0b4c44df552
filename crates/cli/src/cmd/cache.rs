use std::time::Instant;

use anyhow::{Context, Result};

use abiforge_lib::cache::LayerCache;
use abiforge_lib::platform::paths::store_dir;
use abiforge_lib::store_lock::{StoreLock, StoreUse};

use crate::output::{OutputFormat, Summary, format_elapsed, format_size, print_heading, print_layer};

fn open_store(operation: StoreUse) -> Result<(StoreLock, LayerCache)> {
  let store = store_dir();
  let lock = StoreLock::acquire(&store, operation).context("Failed to acquire store lock")?;
  let cache = LayerCache::open(&store).context("Failed to open layer store")?;
  Ok((lock, cache))
}

pub fn cmd_cache_list(output: OutputFormat) -> Result<()> {
  let (_lock, cache) = open_store(StoreUse::CacheList)?;
  let layers = cache.list()?;

  if output.emit_json(&layers)? {
    return Ok(());
  }

  if layers.is_empty() {
    print_heading(&format!("No layers in {}", cache.root().display()));
    return Ok(());
  }

  print_heading(&format!("Layers in {}:", cache.root().display()));
  for layer in &layers {
    print_layer(layer);
  }

  let total: u64 = layers.iter().map(|l| l.size_bytes).sum();
  Summary::default()
    .row("Layers", layers.len())
    .row("Total size", format_size(total))
    .print();

  Ok(())
}

pub fn cmd_cache_prune(output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let (_lock, cache) = open_store(StoreUse::CachePrune)?;
  let stats = cache.prune()?;

  if output.emit_json(&stats)? {
    return Ok(());
  }

  Summary::done("Prune complete!")
    .row("Layers removed", stats.layers_removed)
    .row("Staging directories removed", stats.staging_removed)
    .row("Space freed", format_size(stats.bytes_freed))
    .row("Duration", format_elapsed(start.elapsed()))
    .print();

  Ok(())
}
