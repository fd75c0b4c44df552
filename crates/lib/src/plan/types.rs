use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{AuxiliaryArtifact, BuildMode, PackageSpec};
use crate::placeholder::PlaceholderError;
use crate::util::hash::{HashError, ObjectHash};

/// What a build step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
  /// Every package with no ABI sensitivity and no mode override, installed together.
  Batch,
  /// Non-ABI-sensitive packages sharing one explicit build mode.
  Pinned,
  /// A single ABI-sensitive package.
  Isolated,
  /// A deliberate reinstall of a package installed by an earlier step.
  Reinstall,
  /// Retrieval of one auxiliary artifact.
  Fetch,
  /// Post-build smoke checks.
  Check,
}

impl StepKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      StepKind::Batch => "batch",
      StepKind::Pinned => "pinned",
      StepKind::Isolated => "isolated",
      StepKind::Reinstall => "reinstall",
      StepKind::Fetch => "fetch",
      StepKind::Check => "check",
    }
  }

  /// Whether the step runs the installer.
  pub fn installs(&self) -> bool {
    matches!(
      self,
      StepKind::Batch | StepKind::Pinned | StepKind::Isolated | StepKind::Reinstall
    )
  }
}

impl fmt::Display for StepKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One planned unit of work.
///
/// Steps are totally ordered by `ordinal` (1-based). The `hash` identifies the
/// filesystem state after this step and every step before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
  pub ordinal: usize,
  pub kind: StepKind,
  /// Build mode for install steps; `None` for fetch and check steps.
  pub mode: Option<BuildMode>,
  pub packages: Vec<PackageSpec>,
  /// The artifact retrieved by a fetch step.
  pub artifact: Option<AuxiliaryArtifact>,
  /// Shell commands run in order; empty for fetch steps.
  pub commands: Vec<String>,
  /// Source-mode steps fold the base toolchain into their hash.
  pub toolchain_sensitive: bool,
  pub hash: ObjectHash,
}

impl BuildStep {
  /// Short human-readable description, e.g. `isolated numpy (source)`.
  pub fn label(&self) -> String {
    let subject = match &self.artifact {
      Some(artifact) => format!("{}@{}", artifact.name, artifact.version),
      None if self.kind == StepKind::Check => format!("{} command(s)", self.commands.len()),
      None => self
        .packages
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", "),
    };

    match self.mode {
      Some(mode) => format!("{} {} ({})", self.kind, subject, mode),
      None => format!("{} {}", self.kind, subject),
    }
  }
}

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("manifest conflict for '{package}': {reason}")]
  ManifestConflict { package: String, reason: String },

  #[error("failed to render installer command for step #{ordinal}: {source}")]
  Template {
    ordinal: usize,
    #[source]
    source: PlaceholderError,
  },

  #[error("failed to hash step #{ordinal}: {source}")]
  Hash {
    ordinal: usize,
    #[source]
    source: HashError,
  },
}

impl PlanError {
  pub(crate) fn conflict(package: &str, reason: impl Into<String>) -> Self {
    PlanError::ManifestConflict {
      package: package.to_string(),
      reason: reason.into(),
    }
  }
}
