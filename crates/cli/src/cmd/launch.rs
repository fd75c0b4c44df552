use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use abiforge_lib::launch::{LaunchConfig, launch};

/// Run the worker in the foreground and mirror its exit code.
pub fn cmd_launch(port_var: String, host: String, env_file: Option<PathBuf>, worker: Vec<String>) -> Result<ExitCode> {
  let config = LaunchConfig {
    port_var,
    host,
    env_file,
    worker,
  };

  let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
  let status = runtime.block_on(launch(&config))?;

  // Killed by a signal: no code to forward.
  let code = status.code().unwrap_or(1);
  Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
