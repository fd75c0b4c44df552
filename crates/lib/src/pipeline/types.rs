use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::execute::ExecuteError;
use crate::fetch::FetchError;
use crate::plan::{PlanError, ResolvedPackage, StepKind};
use crate::util::hash::{HashError, ObjectHash};

/// Name of the image record written next to `rootfs/`.
pub const IMAGE_RECORD: &str = "image.json";

/// Directory holding the finished filesystem in the output directory.
pub const IMAGE_ROOTFS: &str = "rootfs";

#[derive(Debug, Error)]
pub enum PipelineError {
  /// Contradictory declarations; nothing was executed.
  #[error("manifest conflict for '{package}': {reason}")]
  ManifestConflict { package: String, reason: String },

  #[error("invalid build plan: {0}")]
  Plan(#[source] PlanError),

  /// A step's command failed. `message` is the tool's stderr, unmodified.
  #[error("step #{ordinal} failed (exit code {code:?}):\n{message}")]
  StepExecutionFailure {
    ordinal: usize,
    code: Option<i32>,
    message: String,
  },

  #[error("step #{ordinal}: artifact '{name}' unavailable: {reason}")]
  ArtifactUnavailable {
    ordinal: usize,
    name: String,
    reason: String,
  },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to prepare {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash manifest: {0}")]
  Hash(#[source] HashError),
}

impl PipelineError {
  /// Ordinal of the failing step, if the failure belongs to one.
  pub fn step(&self) -> Option<usize> {
    match self {
      PipelineError::StepExecutionFailure { ordinal, .. } | PipelineError::ArtifactUnavailable { ordinal, .. } => {
        Some(*ordinal)
      }
      _ => None,
    }
  }
}

impl From<PlanError> for PipelineError {
  fn from(err: PlanError) -> Self {
    match err {
      PlanError::ManifestConflict { package, reason } => PipelineError::ManifestConflict { package, reason },
      other => PipelineError::Plan(other),
    }
  }
}

impl From<ExecuteError> for PipelineError {
  fn from(err: ExecuteError) -> Self {
    match err {
      ExecuteError::StepFailed {
        ordinal, code, stderr, ..
      } => PipelineError::StepExecutionFailure {
        ordinal,
        code,
        message: stderr,
      },
      ExecuteError::Fetch {
        ordinal,
        source: FetchError::ArtifactUnavailable { name, reason, .. },
      } => PipelineError::ArtifactUnavailable { ordinal, name, reason },
      other => PipelineError::StepExecutionFailure {
        ordinal: other.ordinal(),
        code: None,
        message: other.to_string(),
      },
    }
  }
}

/// How a step was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
  Cached,
  Executed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
  pub ordinal: usize,
  pub kind: StepKind,
  pub hash: ObjectHash,
  pub label: String,
  pub status: StepStatus,
}

/// An auxiliary artifact as present in the finished image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
  pub version: String,
  /// Location relative to the image root.
  pub path: PathBuf,
}

/// Contents of `image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
  pub version: u32,
  pub manifest_hash: ObjectHash,
  pub base: String,
  /// Hash of the last step, identifying the finished filesystem.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub final_hash: Option<ObjectHash>,
  pub steps: Vec<StepRecord>,
  pub packages: BTreeMap<String, ResolvedPackage>,
  pub artifacts: BTreeMap<String, ArtifactRecord>,
  pub built_at_unix: u64,
}

/// Summary of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct BuildReport {
  pub image: ImageArtifact,
  pub output: PathBuf,
  pub executed: usize,
  pub cached: usize,
  pub duration: Duration,
}

impl BuildReport {
  pub fn rootfs(&self) -> PathBuf {
    self.output.join(IMAGE_ROOTFS)
  }

  pub fn record_path(&self) -> PathBuf {
    self.output.join(IMAGE_RECORD)
  }
}
