//! Advisory lock over the layer store.
//!
//! `build` and `cache prune` add or remove layers and hold the lock alone.
//! `plan` and `cache list` only read markers and share it. While held
//! exclusively, the lock file carries a JSON note naming the holder; the note
//! is cleared on release.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const LOCK_FILE: &str = ".lock";

/// The command taking the lock. Decides the lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreUse {
  Plan,
  Build,
  CacheList,
  CachePrune,
}

impl StoreUse {
  pub fn is_exclusive(self) -> bool {
    matches!(self, StoreUse::Build | StoreUse::CachePrune)
  }
}

impl fmt::Display for StoreUse {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      StoreUse::Plan => "abiforge plan",
      StoreUse::Build => "abiforge build",
      StoreUse::CacheList => "abiforge cache list",
      StoreUse::CachePrune => "abiforge cache prune",
    })
  }
}

/// Note left in the lock file by an exclusive holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub operation: StoreUse,
  /// RFC 3339, second precision.
  pub since: String,
}

impl LockHolder {
  fn current(operation: StoreUse) -> Self {
    LockHolder {
      pid: std::process::id(),
      operation,
      since: humantime::format_rfc3339_seconds(SystemTime::now()).to_string(),
    }
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (PID {}, since {})", self.operation, self.pid, self.since)
  }
}

fn describe_holder(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(holder) => format!("held by {holder}"),
    None => "held by a reading command".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "layer store {} is busy, {}\nif no abiforge process is running, delete {}",
    .store.display(),
    describe_holder(.holder),
    .lock_file.display()
  )]
  Busy {
    store: PathBuf,
    lock_file: PathBuf,
    holder: Option<LockHolder>,
  },

  #[error("cannot lock layer store at {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreLockError + '_ {
  move |source| StoreLockError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A held store lock. Released, and its note cleared, on drop.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  path: PathBuf,
  operation: StoreUse,
}

impl StoreLock {
  /// Locks `store` for `operation` without waiting, creating the store if needed.
  pub fn acquire(store: &Path, operation: StoreUse) -> Result<Self, StoreLockError> {
    std::fs::create_dir_all(store).map_err(io_err(store))?;
    let path = store.join(LOCK_FILE);

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(io_err(&path))?;

    if !try_lock(&file, operation.is_exclusive()).map_err(io_err(&path))? {
      let holder = read_holder(&file).unwrap_or_else(|err| {
        debug!(path = %path.display(), error = %err, "unreadable lock note");
        None
      });
      return Err(StoreLockError::Busy {
        store: store.to_path_buf(),
        lock_file: path,
        holder,
      });
    }

    let lock = StoreLock { file, path, operation };
    if operation.is_exclusive() {
      lock.write_note(&LockHolder::current(operation))?;
    }

    debug!(path = %lock.path.display(), %operation, "locked layer store");
    Ok(lock)
  }

  pub fn operation(&self) -> StoreUse {
    self.operation
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// The note currently in the lock file, if any.
  pub fn holder(&self) -> io::Result<Option<LockHolder>> {
    read_holder(&self.file)
  }

  fn write_note(&self, holder: &LockHolder) -> Result<(), StoreLockError> {
    write_holder(&self.file, holder).map_err(io_err(&self.path))
  }
}

impl Drop for StoreLock {
  fn drop(&mut self) {
    if self.operation.is_exclusive()
      && let Err(err) = self.file.set_len(0)
    {
      warn!(path = %self.path.display(), error = %err, "failed to clear lock note");
    }
  }
}

fn write_holder(mut file: &File, holder: &LockHolder) -> io::Result<()> {
  let line = serde_json::to_string(holder).map_err(io::Error::other)?;
  file.set_len(0)?;
  file.seek(SeekFrom::Start(0))?;
  writeln!(file, "{line}")?;
  file.flush()
}

/// An empty file means no exclusive holder has left a note.
fn read_holder(mut file: &File) -> io::Result<Option<LockHolder>> {
  file.seek(SeekFrom::Start(0))?;
  let mut contents = String::new();
  file.read_to_string(&mut contents)?;
  let contents = contents.trim();
  if contents.is_empty() {
    return Ok(None);
  }
  serde_json::from_str(contents).map(Some).map_err(io::Error::other)
}

/// Returns `Ok(false)` when another handle holds a conflicting lock.
#[cfg(unix)]
fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
  use rustix::fs::{FlockOperation, flock};

  let operation = if exclusive {
    FlockOperation::NonBlockingLockExclusive
  } else {
    FlockOperation::NonBlockingLockShared
  };

  match flock(file, operation) {
    Ok(()) => Ok(true),
    Err(errno) if errno == rustix::io::Errno::WOULDBLOCK => Ok(false),
    Err(errno) => Err(io::Error::from_raw_os_error(errno.raw_os_error())),
  }
}

#[cfg(windows)]
fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
  if exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: the handle is open for the lifetime of `file`; a zeroed OVERLAPPED is valid.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };

  if locked != 0 {
    return Ok(true);
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Ok(false)
  } else {
    Err(err)
  }
}
