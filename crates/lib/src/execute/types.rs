use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum ExecuteError {
  /// A step command exited unsuccessfully. `stderr` is the tool's output, unmodified.
  #[error("step #{ordinal} failed with exit code {code:?}:\n{stderr}")]
  StepFailed {
    ordinal: usize,
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("step #{ordinal}: failed to spawn {shell}: {source}")]
  Spawn {
    ordinal: usize,
    shell: String,
    #[source]
    source: std::io::Error,
  },

  #[error("step #{ordinal}: failed to prepare working root {path}: {source}")]
  Prepare {
    ordinal: usize,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("step #{ordinal}: {source}")]
  Fetch {
    ordinal: usize,
    #[source]
    source: FetchError,
  },
}

impl ExecuteError {
  /// Ordinal of the step that failed.
  pub fn ordinal(&self) -> usize {
    match self {
      ExecuteError::StepFailed { ordinal, .. }
      | ExecuteError::Spawn { ordinal, .. }
      | ExecuteError::Prepare { ordinal, .. }
      | ExecuteError::Fetch { ordinal, .. } => *ordinal,
    }
  }
}

/// What running one step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
  pub ordinal: usize,
  /// Trimmed stdout of each command, in order.
  pub stdout: Vec<String>,
  /// Directory of the artifact retrieved by a fetch step.
  pub artifact_path: Option<PathBuf>,
}
