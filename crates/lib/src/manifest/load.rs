//! Manifest file loading.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::types::Manifest;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid TOML manifest {path}: {source}")]
  Toml {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid JSON manifest {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("manifest {path}: base.id must not be empty")]
  MissingBaseId { path: PathBuf },
}

/// Load a manifest from disk.
///
/// Files ending in `.json` are parsed as JSON; everything else as TOML.
/// Relative `base.root` and `file` artifact paths are resolved against the
/// manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
  let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let mut manifest = parse_manifest(path, &content)?;

  let base_dir = path.parent().unwrap_or(Path::new("."));
  resolve_relative_paths(&mut manifest, base_dir);

  debug!(
    path = %path.display(),
    packages = manifest.packages.len(),
    artifacts = manifest.artifacts.len(),
    "loaded manifest"
  );

  Ok(manifest)
}

/// Parse manifest text; `path` selects the format and labels errors.
pub fn parse_manifest(path: &Path, content: &str) -> Result<Manifest, ManifestError> {
  let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");

  let manifest: Manifest = if is_json {
    serde_json::from_str(content).map_err(|source| ManifestError::Json {
      path: path.to_path_buf(),
      source,
    })?
  } else {
    toml::from_str(content).map_err(|source| ManifestError::Toml {
      path: path.to_path_buf(),
      source,
    })?
  };

  if manifest.base.id.trim().is_empty() {
    return Err(ManifestError::MissingBaseId {
      path: path.to_path_buf(),
    });
  }

  Ok(manifest)
}

fn resolve_relative_paths(manifest: &mut Manifest, base_dir: &Path) {
  use super::types::ArtifactSource;

  if let Some(root) = &manifest.base.root
    && root.is_relative()
  {
    manifest.base.root = Some(base_dir.join(root));
  }

  for artifact in &mut manifest.artifacts {
    if let ArtifactSource::File { path } = &mut artifact.source
      && path.is_relative()
    {
      *path = base_dir.join(&*path);
    }
  }
}
