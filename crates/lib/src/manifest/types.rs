//! Manifest types.
//!
//! The manifest is the declarative description of everything an image needs:
//! the base environment it starts from, the packages to install (with their
//! build-mode overrides and ABI sensitivity), auxiliary artifacts to bake in,
//! the installer command templates, and post-build smoke checks.
//!
//! # Example
//!
//! ```toml
//! [base]
//! id = "python:3.11-slim"
//! toolchain = "gcc-12"
//!
//! [[packages]]
//! name = "numpy"
//! version = "1.26.4"
//! mode = "source"
//! abi_sensitive = true
//!
//! [[artifacts]]
//! name = "en_core_web_sm"
//! version = "3.7.1"
//! source = { kind = "registry" }
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_ARTIFACTS_DIR;
use crate::util::hash::Hashable;

/// Whether a package is installed from a prebuilt artifact or compiled during the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
  Binary,
  Source,
}

impl BuildMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuildMode::Binary => "binary",
      BuildMode::Source => "source",
    }
  }
}

impl fmt::Display for BuildMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One required package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSpec {
  pub name: String,
  /// Version constraint: `*`, an exact version, or an operator-prefixed range (`>=1.2`).
  #[serde(default = "any_version")]
  pub version: String,
  /// Explicit build-mode override. `None` means "whatever the installer prefers" (binary).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mode: Option<BuildMode>,
  #[serde(default)]
  pub abi_sensitive: bool,
  /// Ordering among ABI-sensitive packages; lower runs first.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<u32>,
  /// Marks this entry as a deliberate reinstall of a package declared earlier.
  /// Only reinstall entries may repeat a package name.
  #[serde(default)]
  pub reinstall: bool,
}

fn any_version() -> String {
  "*".to_string()
}

impl PackageSpec {
  /// The mode this package is actually installed with.
  pub fn effective_mode(&self) -> BuildMode {
    self.mode.unwrap_or(BuildMode::Binary)
  }
}

/// Where an auxiliary artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ArtifactSource {
  /// Download over HTTP(S), optionally verifying a SHA-256 digest.
  Url {
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
  },
  /// Copy a local file or directory.
  File { path: PathBuf },
  /// Resolve through the manifest's `[registry]` URL template.
  Registry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
  },
}

/// A non-package artifact (e.g. a language model bundle) baked into the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuxiliaryArtifact {
  pub name: String,
  pub version: String,
  pub source: ArtifactSource,
}

/// The environment every build starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseEnvironment {
  /// Identifier of the base image; part of every step hash.
  pub id: String,
  /// Compiler toolchain identifier; part of every source-mode step hash.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub toolchain: Option<String>,
  /// Optional directory used to seed the working filesystem.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub root: Option<PathBuf>,
  /// `PATH` given to step commands. Defaults to the host `PATH`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
}

/// Command templates used to install packages.
///
/// Templates are run by `/bin/sh -c` inside the working root and may use the
/// `$${requirements}`, `$${names}`, `$${names_csv}`, `$${reinstall}` and `$${root}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
  pub binary: String,
  pub source: String,
  /// Expanded into `$${reinstall}` for reinstall steps, empty otherwise.
  pub reinstall_flags: String,
}

impl Default for InstallerConfig {
  fn default() -> Self {
    Self {
      binary: "python -m pip install --no-cache-dir --root \"$${root}\" --prefer-binary $${reinstall} $${requirements}"
        .to_string(),
      source: "python -m pip install --no-cache-dir --root \"$${root}\" --no-binary $${names_csv} $${reinstall} \
               $${requirements}"
        .to_string(),
      reinstall_flags: "--force-reinstall --no-deps".to_string(),
    }
  }
}

/// Artifact registry used by `source = { kind = "registry" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryConfig {
  /// URL with `{name}` and `{version}` placeholders.
  pub url_template: String,
}

impl RegistryConfig {
  pub fn url_for(&self, name: &str, version: &str) -> String {
    self.url_template.replace("{name}", name).replace("{version}", version)
  }
}

/// The complete build description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub base: BaseEnvironment,
  #[serde(default)]
  pub packages: Vec<PackageSpec>,
  #[serde(default)]
  pub artifacts: Vec<AuxiliaryArtifact>,
  #[serde(default)]
  pub installer: InstallerConfig,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub registry: Option<RegistryConfig>,
  /// Directory (relative to the image root) that receives auxiliary artifacts.
  #[serde(default = "default_artifacts_dir")]
  pub artifacts_dir: String,
  /// Smoke-test commands run after every install and fetch step.
  #[serde(default)]
  pub checks: Vec<String>,
}

fn default_artifacts_dir() -> String {
  DEFAULT_ARTIFACTS_DIR.to_string()
}

impl Default for Manifest {
  fn default() -> Self {
    Self {
      base: BaseEnvironment::default(),
      packages: Vec::new(),
      artifacts: Vec::new(),
      installer: InstallerConfig::default(),
      registry: None,
      artifacts_dir: default_artifacts_dir(),
      checks: Vec::new(),
    }
  }
}

impl Hashable for Manifest {}
