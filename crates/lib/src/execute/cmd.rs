//! Shell command execution inside a working root.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{ROOT_ENV, SOURCE_DATE_EPOCH};

/// Shell used for every step command.
pub const SHELL: &str = "/bin/sh";

/// Environment given to a step command. Nothing from the host leaks in except `PATH`.
#[derive(Debug, Clone)]
pub struct CmdEnv<'a> {
  pub root: &'a Path,
  pub tmp_dir: &'a Path,
  pub path: &'a str,
}

/// Result of a finished command.
#[derive(Debug)]
pub struct CmdOutput {
  pub success: bool,
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

/// Run `cmd` with `/bin/sh -c` in `env.root` with a cleared environment.
pub async fn run_cmd(cmd: &str, env: &CmdEnv<'_>) -> std::io::Result<CmdOutput> {
  info!(cmd = %cmd, "executing command");

  let mut command = Command::new(SHELL);
  command
    .arg("-c")
    .arg(cmd)
    .current_dir(env.root)
    .env_clear()
    .env("PATH", env.path)
    .env("HOME", env.tmp_dir)
    .env("TMPDIR", env.tmp_dir)
    .env("TMP", env.tmp_dir)
    .env("TEMP", env.tmp_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .env(ROOT_ENV, env.root)
    .kill_on_drop(true);

  debug!(root = %env.root.display(), "spawning process");

  let output = command.output().await?;
  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command stdout");
  }
  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }

  Ok(CmdOutput {
    success: output.status.success(),
    code: output.status.code(),
    stdout,
    stderr,
  })
}
