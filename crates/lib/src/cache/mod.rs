//! Content-addressed layer cache.
//!
//! Each successful build step leaves a snapshot of the working filesystem in
//! the store, keyed by the step hash:
//!
//! ```text
//! <store>/
//!   layers/<hash>/
//!     .abiforge-layer    marker with the snapshot's content hash
//!     rootfs/            filesystem state after the step
//!   tmp/                 staging area for layers being written
//! ```
//!
//! Entries are append-only. A layer only becomes visible once fully written
//! (staged in `tmp/`, then renamed into place), and the first writer of a hash
//! wins. A layer whose marker is missing, unreadable, or whose snapshot no
//! longer matches the recorded content hash is treated as a miss and removed.

mod marker;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::plan::BuildStep;
use crate::util::fs::{copy_dir_all, dir_size, remove_path};
use crate::util::hash::{DirHashError, ObjectHash, hash_directory};

pub use marker::{LAYER_MARKER, LayerMarker};

const LAYERS_DIR: &str = "layers";
const TMP_DIR: &str = "tmp";
const ROOTFS_DIR: &str = "rootfs";

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("layer store I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash layer {hash}: {source}")]
  Hash {
    hash: ObjectHash,
    #[source]
    source: DirHashError,
  },

  #[error("failed to write layer marker {path}: {source}")]
  Marker {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A verified, complete layer.
#[derive(Debug, Clone)]
pub struct Layer {
  pub hash: ObjectHash,
  pub path: PathBuf,
  pub marker: LayerMarker,
}

impl Layer {
  /// The filesystem snapshot captured by this layer.
  pub fn rootfs(&self) -> PathBuf {
    self.path.join(ROOTFS_DIR)
  }
}

/// State of a layer directory as found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
  Complete,
  Incomplete,
  Corrupt,
}

/// A marked layer copy waiting in `tmp/`; removed on drop unless renamed away.
struct StagedLayer {
  _dir: tempfile::TempDir,
  path: PathBuf,
  marker: LayerMarker,
}

/// One entry of [`LayerCache::list`].
#[derive(Debug, Clone, Serialize)]
pub struct LayerInfo {
  pub hash: ObjectHash,
  pub status: LayerStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub marker: Option<LayerMarker>,
  pub size_bytes: u64,
}

/// Result of [`LayerCache::prune`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct PruneStats {
  pub layers_removed: usize,
  pub staging_removed: usize,
  pub bytes_freed: u64,
}

/// Handle to a layer store directory.
#[derive(Debug, Clone)]
pub struct LayerCache {
  root: PathBuf,
}

impl LayerCache {
  /// Open (and create if needed) the store rooted at `root`.
  pub fn open(root: &Path) -> Result<Self, CacheError> {
    for dir in [root.join(LAYERS_DIR), root.join(TMP_DIR)] {
      fs::create_dir_all(&dir).map_err(io_err(&dir))?;
    }

    // Resolve symlinks so that atomic renames stay within one filesystem path.
    let root = dunce::canonicalize(root).map_err(io_err(root))?;
    debug!(path = %root.display(), "opened layer store");

    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn layer_path(&self, hash: &ObjectHash) -> PathBuf {
    self.root.join(LAYERS_DIR).join(&hash.0)
  }

  /// Look up a complete layer, removing it if it fails verification.
  pub fn lookup(&self, hash: &ObjectHash) -> Result<Option<Layer>, CacheError> {
    let path = self.layer_path(hash);
    if !path.exists() {
      return Ok(None);
    }

    match self.inspect(&path) {
      (LayerStatus::Complete, Some(marker)) => {
        debug!(hash = %hash, "layer cache hit");
        Ok(Some(Layer {
          hash: hash.clone(),
          path,
          marker,
        }))
      }
      (status, _) => {
        warn!(hash = %hash, ?status, "discarding unusable layer");
        remove_path(&path).map_err(io_err(&path))?;
        Ok(None)
      }
    }
  }

  /// Whether a marked layer exists for `hash`. Does not verify or remove anything.
  pub fn is_cached(&self, hash: &ObjectHash) -> bool {
    matches!(LayerMarker::read(&self.layer_path(hash)), Ok(Some(_)))
  }

  /// Snapshot `rootfs` as the layer for `step`.
  ///
  /// If a valid layer for the step's hash already exists, it is returned and
  /// the new snapshot is discarded.
  pub fn store(&self, step: &BuildStep, rootfs: &Path) -> Result<Layer, CacheError> {
    if let Some(existing) = self.lookup(&step.hash)? {
      debug!(hash = %step.hash, "layer already stored");
      return Ok(existing);
    }

    let staged = self.stage(step, rootfs)?;
    self.publish(step, staged)
  }

  /// Copy `rootfs` into a staging directory under `tmp/` and mark it.
  fn stage(&self, step: &BuildStep, rootfs: &Path) -> Result<StagedLayer, CacheError> {
    let tmp = self.root.join(TMP_DIR);
    let dir = tempfile::Builder::new()
      .prefix("layer-")
      .tempdir_in(&tmp)
      .map_err(io_err(&tmp))?;
    let path = dir.path().join("layer");
    let staged_rootfs = path.join(ROOTFS_DIR);

    copy_dir_all(rootfs, &staged_rootfs).map_err(io_err(&staged_rootfs))?;

    let output_hash = hash_directory(&staged_rootfs, &[]).map_err(|source| CacheError::Hash {
      hash: step.hash.clone(),
      source,
    })?;
    let marker = LayerMarker::new(step, output_hash);
    marker.write(&path)?;

    Ok(StagedLayer { _dir: dir, path, marker })
  }

  /// Rename a staged layer into place. If another writer got there first, its
  /// layer is kept and the staged copy is dropped.
  fn publish(&self, step: &BuildStep, staged: StagedLayer) -> Result<Layer, CacheError> {
    let dest = self.layer_path(&step.hash);
    if let Err(err) = fs::rename(&staged.path, &dest) {
      if let Some(existing) = self.lookup(&step.hash)? {
        debug!(hash = %step.hash, "layer stored concurrently, keeping first");
        return Ok(existing);
      }
      return Err(CacheError::Io { path: dest, source: err });
    }

    info!(step = step.ordinal, hash = %step.hash, "stored layer");

    Ok(Layer {
      hash: step.hash.clone(),
      path: dest,
      marker: staged.marker,
    })
  }

  /// All layer directories in the store, sorted by hash.
  pub fn list(&self) -> Result<Vec<LayerInfo>, CacheError> {
    let layers_dir = self.root.join(LAYERS_DIR);
    let mut layers = Vec::new();

    for entry in fs::read_dir(&layers_dir).map_err(io_err(&layers_dir))? {
      let entry = entry.map_err(io_err(&layers_dir))?;
      if !entry.path().is_dir() {
        continue;
      }

      let (status, marker) = self.inspect(&entry.path());
      layers.push(LayerInfo {
        hash: ObjectHash(entry.file_name().to_string_lossy().into_owned()),
        status,
        marker,
        size_bytes: dir_size(&entry.path()),
      });
    }

    layers.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(layers)
  }

  /// Remove incomplete or corrupt layers and leftover staging directories.
  pub fn prune(&self) -> Result<PruneStats, CacheError> {
    let mut stats = PruneStats::default();

    for layer in self.list()? {
      if layer.status == LayerStatus::Complete {
        continue;
      }
      let path = self.layer_path(&layer.hash);
      remove_path(&path).map_err(io_err(&path))?;
      info!(hash = %layer.hash, status = ?layer.status, "pruned layer");
      stats.layers_removed += 1;
      stats.bytes_freed += layer.size_bytes;
    }

    let tmp = self.root.join(TMP_DIR);
    for entry in fs::read_dir(&tmp).map_err(io_err(&tmp))? {
      let path = entry.map_err(io_err(&tmp))?.path();
      stats.bytes_freed += dir_size(&path);
      remove_path(&path).map_err(io_err(&path))?;
      stats.staging_removed += 1;
    }

    Ok(stats)
  }

  fn inspect(&self, path: &Path) -> (LayerStatus, Option<LayerMarker>) {
    let marker = match LayerMarker::read(path) {
      Ok(Some(marker)) => marker,
      Ok(None) => return (LayerStatus::Incomplete, None),
      Err(e) => {
        debug!(path = %path.display(), error = %e, "unreadable layer marker");
        return (LayerStatus::Incomplete, None);
      }
    };

    match hash_directory(&path.join(ROOTFS_DIR), &[]) {
      Ok(actual) if actual == marker.output_hash => (LayerStatus::Complete, Some(marker)),
      Ok(actual) => {
        warn!(
          path = %path.display(),
          expected = %marker.output_hash,
          actual = %actual,
          "layer content changed since it was stored"
        );
        (LayerStatus::Corrupt, Some(marker))
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to hash layer");
        (LayerStatus::Corrupt, Some(marker))
      }
    }
  }
}
