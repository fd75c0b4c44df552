//! Step execution.
//!
//! Runs one [`BuildStep`] against the working root left by the previous step.
//! Install and check steps run their shell commands in order and stop at the
//! first failure; fetch steps hand off to the [`Fetcher`].

mod cmd;
mod types;

use std::path::Path;

use tracing::{info, warn};

use crate::fetch::Fetcher;
use crate::manifest::Manifest;
use crate::plan::{BuildStep, StepKind};
use crate::util::fs::remove_path;

pub use cmd::{CmdEnv, CmdOutput, SHELL, run_cmd};
pub use types::{ExecuteError, StepOutcome};

/// Directory inside the working root used for `TMPDIR` and `HOME`.
pub const STEP_TMP_DIR: &str = "tmp";

/// Used when neither the manifest nor the host provide a `PATH`.
const FALLBACK_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Executes planned steps for one manifest.
#[derive(Debug, Clone)]
pub struct Executor {
  path: String,
  fetcher: Fetcher,
}

impl Executor {
  pub fn new(manifest: &Manifest) -> Self {
    let path = manifest
      .base
      .path
      .clone()
      .or_else(|| std::env::var("PATH").ok())
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| FALLBACK_PATH.to_string());

    Self {
      path,
      fetcher: Fetcher::new(manifest),
    }
  }

  /// `PATH` given to step commands.
  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }

  /// Run `step` in `root`.
  ///
  /// # Errors
  ///
  /// Returns [`ExecuteError::StepFailed`] carrying the failing command's stderr
  /// unmodified when a command exits unsuccessfully. Later commands of the step
  /// are not run.
  pub async fn execute_step(&self, step: &BuildStep, root: &Path) -> Result<StepOutcome, ExecuteError> {
    info!(step = step.ordinal, kind = %step.kind, hash = %step.hash, "executing {}", step.label());

    if step.kind == StepKind::Fetch {
      return self.execute_fetch(step, root).await;
    }

    let tmp_dir = root.join(STEP_TMP_DIR);
    let tmp_existed = tmp_dir.exists();
    tokio::fs::create_dir_all(&tmp_dir)
      .await
      .map_err(|source| ExecuteError::Prepare {
        ordinal: step.ordinal,
        path: tmp_dir.clone(),
        source,
      })?;

    let env = CmdEnv {
      root,
      tmp_dir: &tmp_dir,
      path: &self.path,
    };

    let result = run_commands(step, &env).await;
    cleanup_tmp(&tmp_dir, tmp_existed);
    result
  }

  async fn execute_fetch(&self, step: &BuildStep, root: &Path) -> Result<StepOutcome, ExecuteError> {
    let artifact_path = match &step.artifact {
      Some(artifact) => Some(
        self
          .fetcher
          .fetch(artifact, root)
          .await
          .map_err(|source| ExecuteError::Fetch {
            ordinal: step.ordinal,
            source,
          })?,
      ),
      None => None,
    };

    Ok(StepOutcome {
      ordinal: step.ordinal,
      stdout: Vec::new(),
      artifact_path,
    })
  }
}

async fn run_commands(step: &BuildStep, env: &CmdEnv<'_>) -> Result<StepOutcome, ExecuteError> {
  let mut stdout = Vec::with_capacity(step.commands.len());

  for command in &step.commands {
    let output = run_cmd(command, env).await.map_err(|source| ExecuteError::Spawn {
      ordinal: step.ordinal,
      shell: SHELL.to_string(),
      source,
    })?;

    if !output.success {
      return Err(ExecuteError::StepFailed {
        ordinal: step.ordinal,
        command: command.clone(),
        code: output.code,
        stderr: output.stderr,
      });
    }
    stdout.push(output.stdout);
  }

  Ok(StepOutcome {
    ordinal: step.ordinal,
    stdout,
    artifact_path: None,
  })
}

/// Empty the step's temp directory so it never ends up in a layer. A `tmp/`
/// that was part of the root before the step is kept, emptied.
fn cleanup_tmp(tmp_dir: &Path, existed: bool) {
  let result = remove_path(tmp_dir).and_then(|()| {
    if existed {
      std::fs::create_dir_all(tmp_dir)
    } else {
      Ok(())
    }
  });

  if let Err(e) = result {
    warn!(path = %tmp_dir.display(), error = %e, "failed to clean step temp directory");
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::manifest::{ArtifactSource, AuxiliaryArtifact};
  use crate::plan::plan;
  use crate::util::testutil::{manifest, pkg};
  use tempfile::TempDir;

  #[tokio::test]
  async fn install_step_runs_rendered_command() {
    let m = manifest(vec![pkg("flask", "3.0.0"), pkg("gunicorn", "*")], vec![]);
    let steps = plan(&m).unwrap();
    let temp = TempDir::new().unwrap();

    let outcome = Executor::new(&m).execute_step(&steps[0], temp.path()).await.unwrap();

    assert_eq!(outcome.ordinal, 1);
    let log = std::fs::read_to_string(temp.path().join("installed.log")).unwrap();
    assert_eq!(log.trim(), "binary flask==3.0.0 gunicorn");
    assert_eq!(std::fs::read_to_string(temp.path().join("site-gunicorn")).unwrap(), "binary\n");
    assert!(!temp.path().join(STEP_TMP_DIR).exists());
  }

  #[tokio::test]
  async fn failing_check_reports_ordinal_and_stderr() {
    let mut m = manifest(vec![pkg("flask", "*")], vec![]);
    m.checks = vec![
      "true".to_string(),
      "echo 'ModuleNotFoundError: No module named flask' >&2; exit 1".to_string(),
      "touch never-run".to_string(),
    ];
    let steps = plan(&m).unwrap();
    let temp = TempDir::new().unwrap();

    let err = Executor::new(&m).execute_step(&steps[1], temp.path()).await.unwrap_err();

    assert_eq!(err.ordinal(), 2);
    match err {
      ExecuteError::StepFailed { stderr, code, .. } => {
        assert_eq!(stderr, "ModuleNotFoundError: No module named flask\n");
        assert_eq!(code, Some(1));
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(!temp.path().join("never-run").exists());
  }

  #[tokio::test]
  async fn existing_tmp_dir_is_kept_empty() {
    let mut m = manifest(vec![], vec![]);
    m.checks = vec!["touch \"$TMPDIR/scratch\"".to_string()];
    let steps = plan(&m).unwrap();
    let temp = TempDir::new().unwrap();
    std::fs::create_dir(temp.path().join("tmp")).unwrap();

    Executor::new(&m).execute_step(&steps[0], temp.path()).await.unwrap();

    assert!(temp.path().join("tmp").is_dir());
    assert!(!temp.path().join("tmp/scratch").exists());
  }

  #[tokio::test]
  async fn base_path_override_is_used() {
    let mut m = manifest(vec![], vec![]);
    m.base.path = Some("/opt/tools/bin:/usr/bin:/bin".to_string());
    m.checks = vec!["echo \"$PATH\" > path.txt".to_string()];
    let steps = plan(&m).unwrap();
    let temp = TempDir::new().unwrap();

    Executor::new(&m).execute_step(&steps[0], temp.path()).await.unwrap();

    assert_eq!(
      std::fs::read_to_string(temp.path().join("path.txt")).unwrap().trim(),
      "/opt/tools/bin:/usr/bin:/bin"
    );
  }

  #[tokio::test]
  async fn fetch_step_delegates_to_fetcher() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("model.bin");
    std::fs::write(&src, "weights").unwrap();
    let m = manifest(
      vec![],
      vec![AuxiliaryArtifact {
        name: "model".to_string(),
        version: "1".to_string(),
        source: ArtifactSource::File { path: src },
      }],
    );
    let steps = plan(&m).unwrap();
    let root = temp.path().join("root");

    let outcome = Executor::new(&m).execute_step(&steps[0], &root).await.unwrap();

    let dir = outcome.artifact_path.unwrap();
    assert_eq!(dir, root.join("opt/artifacts/model/1"));
    assert!(dir.join("model.bin").exists());
  }

  #[tokio::test]
  async fn fetch_failure_keeps_ordinal() {
    let temp = TempDir::new().unwrap();
    let m = manifest(
      vec![pkg("flask", "*")],
      vec![AuxiliaryArtifact {
        name: "model".to_string(),
        version: "1".to_string(),
        source: ArtifactSource::Registry { sha256: None },
      }],
    );
    let steps = plan(&m).unwrap();

    let err = Executor::new(&m).execute_step(&steps[1], temp.path()).await.unwrap_err();

    assert_eq!(err.ordinal(), 2);
    assert!(matches!(err, ExecuteError::Fetch { .. }));
  }
}
