//! Step planning.
//!
//! Converts a [`Manifest`] into a totally ordered list of [`BuildStep`]s:
//!
//! 1. one `batch` step for packages with no ABI sensitivity and no mode override
//! 2. one `pinned` step per explicit mode for the remaining non-ABI packages (binary first)
//! 3. one `isolated` step per ABI-sensitive package, by priority then declaration order
//! 4. one `reinstall` step per reinstall entry, in declaration order
//! 5. one `fetch` step per auxiliary artifact
//! 6. a final `check` step when the manifest declares smoke checks
//!
//! Each step's hash chains the previous step's hash, so a change to any step
//! invalidates it and everything after it but nothing before it.
//!
//! Planning is pure: it never touches the filesystem, so a conflict is reported
//! before anything runs.

mod render;
mod types;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::DEFAULT_PRIORITY;
use crate::fetch::{escapes_root, is_plain_segment};
use crate::manifest::{AuxiliaryArtifact, BuildMode, Manifest, PackageSpec};
use crate::placeholder::substitute;
use crate::util::hash::{Hashable, ObjectHash};

pub use render::{render_requirement, shell_quote};
pub use types::{BuildStep, PlanError, StepKind};

use render::StepResolver;

/// Hash input for a step. Field order is part of the hash format.
#[derive(Serialize)]
struct StepKey<'a> {
  kind: StepKind,
  mode: Option<BuildMode>,
  packages: &'a [PackageSpec],
  commands: &'a [String],
  base: &'a str,
  toolchain: Option<&'a str>,
  artifact: Option<&'a AuxiliaryArtifact>,
  artifacts_dir: Option<&'a str>,
  parent: Option<&'a ObjectHash>,
}

impl Hashable for StepKey<'_> {}

/// A step before ordinals and hashes are assigned.
struct Draft {
  kind: StepKind,
  mode: Option<BuildMode>,
  packages: Vec<PackageSpec>,
  artifact: Option<AuxiliaryArtifact>,
}

/// Plan the build steps for a manifest.
///
/// # Errors
///
/// Returns [`PlanError::ManifestConflict`] when a package is declared more than
/// once without `reinstall`, a reinstall has no earlier declaration, a name is
/// empty, or an artifact is declared twice.
pub fn plan(manifest: &Manifest) -> Result<Vec<BuildStep>, PlanError> {
  validate(manifest)?;

  let mut drafts = Vec::new();
  let primaries: Vec<&PackageSpec> = manifest.packages.iter().filter(|p| !p.reinstall).collect();

  let batch: Vec<PackageSpec> = primaries
    .iter()
    .filter(|p| !p.abi_sensitive && p.mode.is_none())
    .map(|p| (*p).clone())
    .collect();
  if !batch.is_empty() {
    drafts.push(Draft {
      kind: StepKind::Batch,
      mode: Some(BuildMode::Binary),
      packages: batch,
      artifact: None,
    });
  }

  let mut pinned: BTreeMap<BuildMode, Vec<PackageSpec>> = BTreeMap::new();
  for spec in primaries.iter().filter(|p| !p.abi_sensitive) {
    if let Some(mode) = spec.mode {
      pinned.entry(mode).or_default().push((*spec).clone());
    }
  }
  for (mode, packages) in pinned {
    drafts.push(Draft {
      kind: StepKind::Pinned,
      mode: Some(mode),
      packages,
      artifact: None,
    });
  }

  let mut isolated: Vec<&PackageSpec> = primaries.iter().copied().filter(|p| p.abi_sensitive).collect();
  // stable: equal priorities keep declaration order
  isolated.sort_by_key(|p| p.priority.unwrap_or(DEFAULT_PRIORITY));
  for spec in isolated {
    drafts.push(Draft {
      kind: StepKind::Isolated,
      mode: Some(spec.effective_mode()),
      packages: vec![spec.clone()],
      artifact: None,
    });
  }

  for spec in manifest.packages.iter().filter(|p| p.reinstall) {
    drafts.push(Draft {
      kind: StepKind::Reinstall,
      mode: Some(spec.effective_mode()),
      packages: vec![spec.clone()],
      artifact: None,
    });
  }

  for artifact in &manifest.artifacts {
    drafts.push(Draft {
      kind: StepKind::Fetch,
      mode: None,
      packages: Vec::new(),
      artifact: Some(artifact.clone()),
    });
  }

  if !manifest.checks.is_empty() {
    drafts.push(Draft {
      kind: StepKind::Check,
      mode: None,
      packages: Vec::new(),
      artifact: None,
    });
  }

  let mut steps: Vec<BuildStep> = Vec::with_capacity(drafts.len());
  for (index, draft) in drafts.into_iter().enumerate() {
    let parent = steps.last().map(|s| s.hash.clone());
    let step = finalize(manifest, draft, index + 1, parent.as_ref())?;
    debug!(
      step = step.ordinal,
      kind = %step.kind,
      hash = %step.hash,
      "planned {}",
      step.label()
    );
    steps.push(step);
  }

  Ok(steps)
}

fn validate(manifest: &Manifest) -> Result<(), PlanError> {
  let mut primaries: HashMap<&str, &PackageSpec> = HashMap::new();

  for spec in &manifest.packages {
    let name = spec.name.as_str();
    if name.trim().is_empty() {
      return Err(PlanError::conflict(name, "package name must not be empty"));
    }
    if name.trim() != name {
      return Err(PlanError::conflict(name, "package name has leading or trailing whitespace"));
    }

    if spec.reinstall {
      if !primaries.contains_key(name) {
        return Err(PlanError::conflict(
          name,
          "reinstall entry has no earlier declaration of the package",
        ));
      }
      continue;
    }

    if let Some(previous) = primaries.insert(name, spec) {
      let reason = if previous.mode != spec.mode {
        format!(
          "conflicting build modes ({} and {}) without a reinstall entry",
          mode_label(previous.mode),
          mode_label(spec.mode)
        )
      } else if previous.version != spec.version {
        format!(
          "conflicting versions ('{}' and '{}') without a reinstall entry",
          previous.version, spec.version
        )
      } else {
        "declared more than once".to_string()
      };
      return Err(PlanError::conflict(name, reason));
    }
  }

  if escapes_root(&manifest.artifacts_dir) {
    return Err(PlanError::conflict(
      &manifest.artifacts_dir,
      "artifacts_dir must stay inside the image root",
    ));
  }

  let mut artifacts = HashSet::new();
  for artifact in &manifest.artifacts {
    if artifact.name.trim().is_empty() {
      return Err(PlanError::conflict(&artifact.name, "artifact name must not be empty"));
    }
    if !is_plain_segment(&artifact.name) || !is_plain_segment(&artifact.version) {
      return Err(PlanError::conflict(
        &artifact.name,
        format!(
          "artifact name and version must be single path components (got '{}' / '{}')",
          artifact.name, artifact.version
        ),
      ));
    }
    if !artifacts.insert((artifact.name.as_str(), artifact.version.as_str())) {
      return Err(PlanError::conflict(&artifact.name, "artifact declared more than once"));
    }
  }

  Ok(())
}

fn mode_label(mode: Option<BuildMode>) -> &'static str {
  mode.map(|m| m.as_str()).unwrap_or("unspecified")
}

fn finalize(
  manifest: &Manifest,
  draft: Draft,
  ordinal: usize,
  parent: Option<&ObjectHash>,
) -> Result<BuildStep, PlanError> {
  let commands = match draft.kind {
    StepKind::Fetch => Vec::new(),
    StepKind::Check => manifest.checks.clone(),
    kind => {
      let template = match draft.mode {
        Some(BuildMode::Source) => &manifest.installer.source,
        _ => &manifest.installer.binary,
      };
      let flags = (kind == StepKind::Reinstall).then_some(manifest.installer.reinstall_flags.as_str());
      let resolver = StepResolver::new(&draft.packages, flags);
      let command = substitute(template, &resolver).map_err(|source| PlanError::Template { ordinal, source })?;
      vec![command]
    }
  };

  let toolchain_sensitive = draft.mode == Some(BuildMode::Source);

  let key = StepKey {
    kind: draft.kind,
    mode: draft.mode,
    packages: &draft.packages,
    commands: &commands,
    base: &manifest.base.id,
    toolchain: if toolchain_sensitive {
      manifest.base.toolchain.as_deref()
    } else {
      None
    },
    artifact: draft.artifact.as_ref(),
    artifacts_dir: draft.artifact.as_ref().map(|_| manifest.artifacts_dir.as_str()),
    parent,
  };
  let hash = key.compute_hash().map_err(|source| PlanError::Hash { ordinal, source })?;

  Ok(BuildStep {
    ordinal,
    kind: draft.kind,
    mode: draft.mode,
    packages: draft.packages,
    artifact: draft.artifact,
    commands,
    toolchain_sensitive,
    hash,
  })
}

/// A package as present in the finished image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
  pub version: String,
  pub mode: BuildMode,
  /// Ordinal of the step that installed the package last.
  pub step: usize,
}

/// The final package set after running `steps` in order; later steps win.
pub fn resolve_packages(steps: &[BuildStep]) -> BTreeMap<String, ResolvedPackage> {
  let mut resolved = BTreeMap::new();

  for step in steps.iter().filter(|s| s.kind.installs()) {
    let mode = step.mode.unwrap_or(BuildMode::Binary);
    for spec in &step.packages {
      resolved.insert(
        spec.name.clone(),
        ResolvedPackage {
          version: spec.version.clone(),
          mode,
          step: step.ordinal,
        },
      );
    }
  }

  resolved
}
