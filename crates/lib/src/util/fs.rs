//! Filesystem helpers for moving image roots in and out of the layer store.

use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Copy a directory tree, preserving symlinks instead of following them.
///
/// `dst` is created if missing. Existing files at the destination are overwritten.
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(rel);
    let file_type = entry.file_type();

    if file_type.is_symlink() {
      let link_target = fs::read_link(entry.path())?;
      if target.symlink_metadata().is_ok() {
        remove_path(&target)?;
      }
      create_symlink(&link_target, &target)?;
    } else if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

/// Remove a path (file, directory, or symlink). Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
  let meta = match path.symlink_metadata() {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };

  if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// Total size in bytes of the regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  if target.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}
