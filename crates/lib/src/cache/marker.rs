//! Layer completion marker.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::CacheError;
use crate::plan::{BuildStep, StepKind};
use crate::util::hash::{ContentHash, ObjectHash};

/// Marker file written last into a layer directory.
pub const LAYER_MARKER: &str = ".abiforge-layer";

const MARKER_VERSION: u32 = 1;

/// Contents of [`LAYER_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMarker {
  pub version: u32,
  pub step_hash: ObjectHash,
  pub ordinal: usize,
  pub kind: StepKind,
  pub label: String,
  /// Full hash of the layer's `rootfs/` at the time it was stored.
  pub output_hash: ContentHash,
  pub created_at_unix: u64,
}

impl LayerMarker {
  pub(super) fn new(step: &BuildStep, output_hash: ContentHash) -> Self {
    Self {
      version: MARKER_VERSION,
      step_hash: step.hash.clone(),
      ordinal: step.ordinal,
      kind: step.kind,
      label: step.label(),
      output_hash,
      created_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    }
  }

  pub(super) fn write(&self, layer_dir: &Path) -> Result<(), CacheError> {
    let path = layer_dir.join(LAYER_MARKER);
    let content = serde_json::to_string_pretty(self).map_err(|source| CacheError::Marker {
      path: path.clone(),
      source,
    })?;
    fs::write(&path, format!("{content}\n")).map_err(|source| CacheError::Io { path, source })
  }

  /// Returns `Ok(None)` when the layer has no marker.
  pub(super) fn read(layer_dir: &Path) -> io::Result<Option<Self>> {
    let path = layer_dir.join(LAYER_MARKER);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e),
    };

    let marker: Self = serde_json::from_str(&content).map_err(io::Error::other)?;
    if marker.version != MARKER_VERSION {
      return Err(io::Error::other(format!("unsupported marker version {}", marker.version)));
    }
    Ok(Some(marker))
  }
}
