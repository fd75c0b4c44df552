//! Auxiliary artifact fetching.
//!
//! Artifacts land in `<root>/<artifacts_dir>/<name>/<version>/`. A completion
//! marker is written last, so a fetch that finds the marker is a no-op and a
//! fetch interrupted halfway is redone from scratch.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::manifest::{ArtifactSource, AuxiliaryArtifact, Manifest, RegistryConfig};
use crate::util::fs::copy_dir_all;
use crate::util::hash::hash_bytes;

/// Marker written into an artifact directory once it is complete.
pub const FETCH_MARKER: &str = ".abiforge-fetched";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("artifact '{name}' ({version}) unavailable: {reason}")]
  ArtifactUnavailable {
    name: String,
    version: String,
    reason: String,
  },
}

impl FetchError {
  fn unavailable(artifact: &AuxiliaryArtifact, reason: impl ToString) -> Self {
    FetchError::ArtifactUnavailable {
      name: artifact.name.clone(),
      version: artifact.version.clone(),
      reason: reason.to_string(),
    }
  }
}

/// Contents of [`FETCH_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
  pub name: String,
  pub version: String,
  /// URL or local path the artifact came from.
  pub origin: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  pub fetched_at_unix: u64,
}

/// Retrieves auxiliary artifacts into a working root.
#[derive(Debug, Clone)]
pub struct Fetcher {
  client: reqwest::Client,
  registry: Option<RegistryConfig>,
  artifacts_dir: String,
}

impl Fetcher {
  pub fn new(manifest: &Manifest) -> Self {
    let client = reqwest::Client::builder()
      .connect_timeout(CONNECT_TIMEOUT)
      .build()
      .unwrap_or_else(|_| reqwest::Client::new());

    Self {
      client,
      registry: manifest.registry.clone(),
      artifacts_dir: manifest.artifacts_dir.clone(),
    }
  }

  /// Where `artifact` lives inside `root`.
  pub fn artifact_dir(&self, root: &Path, artifact: &AuxiliaryArtifact) -> PathBuf {
    root
      .join(self.artifacts_dir.trim_start_matches('/'))
      .join(&artifact.name)
      .join(&artifact.version)
  }

  /// Fetch `artifact` into `root`, returning its directory.
  ///
  /// # Errors
  ///
  /// Every failure is reported as [`FetchError::ArtifactUnavailable`] naming
  /// the artifact. Partially written directories are removed.
  pub async fn fetch(&self, artifact: &AuxiliaryArtifact, root: &Path) -> Result<PathBuf, FetchError> {
    if !is_plain_segment(&artifact.name) || !is_plain_segment(&artifact.version) || escapes_root(&self.artifacts_dir) {
      return Err(FetchError::unavailable(artifact, "artifact location is outside the image root"));
    }
    let dir = self.artifact_dir(root, artifact);

    if fs::try_exists(dir.join(FETCH_MARKER)).await.unwrap_or(false) {
      debug!(name = %artifact.name, path = %dir.display(), "artifact already present");
      return Ok(dir);
    }

    info!(name = %artifact.name, version = %artifact.version, "fetching artifact");

    if fs::try_exists(&dir).await.unwrap_or(false) {
      debug!(path = %dir.display(), "removing incomplete artifact");
      fs::remove_dir_all(&dir)
        .await
        .map_err(|e| FetchError::unavailable(artifact, e))?;
    }
    fs::create_dir_all(&dir)
      .await
      .map_err(|e| FetchError::unavailable(artifact, e))?;

    match self.retrieve(artifact, &dir).await {
      Ok(record) => {
        write_record(&dir, &record)
          .await
          .map_err(|e| FetchError::unavailable(artifact, e))?;
        info!(name = %artifact.name, origin = %record.origin, "artifact ready");
        Ok(dir)
      }
      Err(reason) => {
        let _ = fs::remove_dir_all(&dir).await;
        Err(FetchError::unavailable(artifact, reason))
      }
    }
  }

  async fn retrieve(&self, artifact: &AuxiliaryArtifact, dir: &Path) -> Result<FetchRecord, String> {
    let (origin, sha256) = match &artifact.source {
      ArtifactSource::Url { url, sha256 } => {
        self.download(url, sha256.as_deref(), dir).await?;
        (url.clone(), sha256.clone())
      }
      ArtifactSource::Registry { sha256 } => {
        let registry = self
          .registry
          .as_ref()
          .ok_or_else(|| "no [registry] configured in the manifest".to_string())?;
        let url = registry.url_for(&artifact.name, &artifact.version);
        self.download(&url, sha256.as_deref(), dir).await?;
        (url, sha256.clone())
      }
      ArtifactSource::File { path } => {
        copy_local(path, dir).await?;
        (path.display().to_string(), None)
      }
    };

    Ok(FetchRecord {
      name: artifact.name.clone(),
      version: artifact.version.clone(),
      origin,
      sha256,
      fetched_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    })
  }

  async fn download(&self, url: &str, expected_sha256: Option<&str>, dir: &Path) -> Result<PathBuf, String> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| format!("request to {url} failed: {e}"))?;

    if !response.status().is_success() {
      return Err(format!("{url} returned HTTP {}", response.status()));
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| format!("failed to read body of {url}: {e}"))?;

    if let Some(expected) = expected_sha256 {
      let actual = hash_bytes(&bytes).0;
      if !actual.eq_ignore_ascii_case(expected) {
        return Err(format!("sha256 mismatch for {url}: expected {expected}, got {actual}"));
      }
    }

    let dest = dir.join(url_to_filename(url));
    let mut file = fs::File::create(&dest).await.map_err(|e| e.to_string())?;
    file.write_all(&bytes).await.map_err(|e| e.to_string())?;
    file.flush().await.map_err(|e| e.to_string())?;

    debug!(path = %dest.display(), size = bytes.len(), "download complete");
    Ok(dest)
  }
}

async fn copy_local(src: &Path, dir: &Path) -> Result<(), String> {
  let meta = fs::metadata(src)
    .await
    .map_err(|e| format!("{}: {e}", src.display()))?;

  if meta.is_dir() {
    let (src, dir) = (src.to_path_buf(), dir.to_path_buf());
    tokio::task::spawn_blocking(move || copy_dir_all(&src, &dir))
      .await
      .map_err(|e| e.to_string())?
      .map_err(|e| e.to_string())
  } else {
    let file_name = src
      .file_name()
      .ok_or_else(|| format!("{} has no file name", src.display()))?;
    fs::copy(src, dir.join(file_name))
      .await
      .map(|_| ())
      .map_err(|e| format!("{}: {e}", src.display()))
  }
}

async fn write_record(dir: &Path, record: &FetchRecord) -> std::io::Result<()> {
  let content = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
  fs::write(dir.join(FETCH_MARKER), format!("{content}\n")).await
}

/// Derive a safe file name from the last path segment of a URL.
/// True when `segment` is exactly one ordinary path component.
pub(crate) fn is_plain_segment(segment: &str) -> bool {
  if segment.contains(['/', '\\']) {
    return false;
  }
  let mut components = Path::new(segment).components();
  matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// True when `dir`, taken relative to a root, could resolve outside it.
pub(crate) fn escapes_root(dir: &str) -> bool {
  Path::new(dir)
    .components()
    .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

fn url_to_filename(url: &str) -> String {
  let last = url.rsplit('/').next().unwrap_or_default();
  let last = last.split(['?', '#']).next().unwrap_or_default();

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
    return sanitized;
  }

  format!("download_{}", &hash_bytes(url.as_bytes()).0[..16])
}
