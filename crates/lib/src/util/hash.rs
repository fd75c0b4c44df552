//! Content hashing.
//!
//! Two hash types are used throughout the crate:
//! - [`ObjectHash`]: truncated SHA-256 of a serialized value. Identifies build
//!   steps and names layer directories.
//! - [`ContentHash`]: full SHA-256 of bytes or a directory tree. Verifies that
//!   a stored layer is unchanged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// Truncated hex digest of a value's JSON form, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Values whose identity is the hash of their serialized form.
///
/// Field order is part of the hash, so reordering a struct's fields
/// invalidates every hash computed from it.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_vec(self)?;
    let digest = hex::encode(Sha256::digest(&serialized));
    Ok(ObjectHash(digest[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// Full 64-character SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Hash a directory tree.
///
/// Covers relative paths, file contents, symlink targets and the executable
/// bit. Timestamps and ownership are ignored, so identical trees built at
/// different times hash the same. Names in `exclude` are skipped at any depth.
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().is_none_or(|name| !exclude.contains(&name)));

  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
    let file_type = entry.file_type();

    let line = if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(read_err(path))?;
      format!("L {rel} {}", target.to_string_lossy())
    } else if file_type.is_file() {
      let exec = if is_executable(&entry) { "x" } else { "-" };
      format!("F{exec} {rel} {}", hash_file(path)?)
    } else if file_type.is_dir() {
      format!("D {rel}")
    } else {
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(read_err(path))?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err(path))?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

fn read_err(path: &Path) -> impl FnOnce(io::Error) -> DirHashError + '_ {
  move |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  }
}

#[cfg(unix)]
fn is_executable(entry: &walkdir::DirEntry) -> bool {
  use std::os::unix::fs::PermissionsExt;
  entry.metadata().is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_entry: &walkdir::DirEntry) -> bool {
  false
}
