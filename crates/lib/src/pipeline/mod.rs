//! Build pipeline.
//!
//! Plans the manifest, restores the newest cached layer on the plan's hash
//! chain, executes the remaining steps in order (storing a layer after each),
//! and finally writes the image:
//!
//! ```text
//! <output>/
//!   rootfs/       finished filesystem
//!   image.json    manifest hash, step records, resolved packages, artifacts
//! ```
//!
//! The working root lives in a hidden directory inside `<output>` until every
//! step has succeeded, so a failed build never leaves `image.json` behind.

mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::cache::{Layer, LayerCache};
use crate::execute::Executor;
use crate::manifest::Manifest;
use crate::plan::{BuildStep, StepKind, plan, resolve_packages};
use crate::util::fs::{copy_dir_all, remove_path};
use crate::util::hash::Hashable;

pub use types::{
  ArtifactRecord, BuildReport, IMAGE_RECORD, IMAGE_ROOTFS, ImageArtifact, PipelineError, StepRecord, StepStatus,
};

const IMAGE_VERSION: u32 = 1;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
  move |source| PipelineError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Build the image for `manifest` into `output`.
///
/// # Errors
///
/// Fails fast: the first failing step aborts the run. Layers stored for the
/// steps that succeeded stay in the cache for the next attempt.
pub async fn run_pipeline(manifest: &Manifest, cache: &LayerCache, output: &Path) -> Result<BuildReport, PipelineError> {
  let started = Instant::now();
  let manifest_hash = manifest.compute_hash().map_err(PipelineError::Hash)?;
  let steps = plan(manifest)?;

  info!(
    manifest = %manifest_hash,
    base = %manifest.base.id,
    steps = steps.len(),
    "starting build"
  );

  // A previous image is invalid from here on; a failed build leaves neither part.
  std::fs::create_dir_all(output).map_err(io_err(output))?;
  for stale in [output.join(IMAGE_RECORD), output.join(IMAGE_ROOTFS)] {
    remove_path(&stale).map_err(io_err(&stale))?;
  }

  let work = tempfile::Builder::new()
    .prefix(".abiforge-work-")
    .tempdir_in(output)
    .map_err(io_err(output))?;
  let root = work.path().join(IMAGE_ROOTFS);

  let restored = newest_cached_layer(cache, &steps)?;
  let resume_at = seed_root(manifest, restored.as_ref(), &root)?;

  let executor = Executor::new(manifest);
  let mut records = Vec::with_capacity(steps.len());

  for step in &steps[..resume_at] {
    info!(step = step.ordinal, hash = %step.hash, "cached {}", step.label());
    records.push(record(step, StepStatus::Cached));
  }

  for step in &steps[resume_at..] {
    executor.execute_step(step, &root).await?;
    cache.store(step, &root)?;
    records.push(record(step, StepStatus::Executed));
  }

  let artifacts = steps
    .iter()
    .filter(|s| s.kind == StepKind::Fetch)
    .filter_map(|s| s.artifact.as_ref())
    .map(|artifact| {
      let path = executor.fetcher().artifact_dir(Path::new(""), artifact);
      (
        artifact.name.clone(),
        ArtifactRecord {
          version: artifact.version.clone(),
          path,
        },
      )
    })
    .collect::<BTreeMap<_, _>>();

  let image = ImageArtifact {
    version: IMAGE_VERSION,
    manifest_hash,
    base: manifest.base.id.clone(),
    final_hash: steps.last().map(|s| s.hash.clone()),
    steps: records,
    packages: resolve_packages(&steps),
    artifacts,
    built_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
  };

  finish_image(&root, output, &image)?;

  let executed = image.steps.iter().filter(|s| s.status == StepStatus::Executed).count();
  let report = BuildReport {
    cached: image.steps.len() - executed,
    executed,
    image,
    output: output.to_path_buf(),
    duration: started.elapsed(),
  };

  info!(
    executed = report.executed,
    cached = report.cached,
    output = %output.display(),
    "image complete"
  );

  Ok(report)
}

/// Hashes chain, so any hit holds the full filesystem state up to its step.
/// The newest hit is the best place to resume from.
fn newest_cached_layer(cache: &LayerCache, steps: &[BuildStep]) -> Result<Option<(usize, Layer)>, PipelineError> {
  for (index, step) in steps.iter().enumerate().rev() {
    if let Some(layer) = cache.lookup(&step.hash)? {
      debug!(step = step.ordinal, hash = %step.hash, "resuming from cached layer");
      return Ok(Some((index + 1, layer)));
    }
  }
  Ok(None)
}

/// Populate the working root and return the index of the first step to run.
fn seed_root(manifest: &Manifest, restored: Option<&(usize, Layer)>, root: &Path) -> Result<usize, PipelineError> {
  match restored {
    Some((resume_at, layer)) => {
      let rootfs = layer.rootfs();
      copy_dir_all(&rootfs, root).map_err(io_err(&rootfs))?;
      Ok(*resume_at)
    }
    None => {
      match &manifest.base.root {
        Some(base_root) => copy_dir_all(base_root, root).map_err(io_err(base_root))?,
        None => std::fs::create_dir_all(root).map_err(io_err(root))?,
      }
      Ok(0)
    }
  }
}

fn record(step: &BuildStep, status: StepStatus) -> StepRecord {
  StepRecord {
    ordinal: step.ordinal,
    kind: step.kind,
    hash: step.hash.clone(),
    label: step.label(),
    status,
  }
}

/// Move the finished root into place, then write `image.json` last.
fn finish_image(root: &Path, output: &Path, image: &ImageArtifact) -> Result<(), PipelineError> {
  let rootfs = output.join(IMAGE_ROOTFS);
  std::fs::rename(root, &rootfs).map_err(io_err(&rootfs))?;

  let record_path = output.join(IMAGE_RECORD);
  let partial = output.join(format!(".{IMAGE_RECORD}.partial"));
  let content = serde_json::to_string_pretty(image).map_err(|e| PipelineError::Io {
    path: record_path.clone(),
    source: std::io::Error::other(e),
  })?;
  std::fs::write(&partial, format!("{content}\n")).map_err(io_err(&partial))?;
  std::fs::rename(&partial, &record_path).map_err(io_err(&record_path))?;

  Ok(())
}

/// Read a previously written `image.json`.
pub fn read_image(output: &Path) -> Result<ImageArtifact, PipelineError> {
  let path = output.join(IMAGE_RECORD);
  let content = std::fs::read_to_string(&path).map_err(io_err(&path))?;
  serde_json::from_str(&content).map_err(|e| PipelineError::Io {
    path,
    source: std::io::Error::other(e),
  })
}
