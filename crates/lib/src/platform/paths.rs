use std::path::PathBuf;

use crate::consts::{APP_NAME, STORE_ENV};

/// Returns the user's home directory, if it can be determined.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if it can be determined.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var_os("XDG_DATA_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
    .unwrap_or_else(std::env::temp_dir);
  data_home.join(APP_NAME)
}

/// Returns the layer store root.
///
/// `ABIFORGE_STORE` takes precedence over the platform data directory.
pub fn store_dir() -> PathBuf {
  match std::env::var_os(STORE_ENV) {
    Some(path) if !path.is_empty() => PathBuf::from(path),
    _ => data_dir().join("store"),
  }
}
