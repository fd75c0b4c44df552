//! Runtime launcher.
//!
//! Resolves the listening port from the environment, checks that the port can
//! be bound, and starts exactly one worker process against it. Restart policy
//! belongs to whatever supervises the launcher.
//!
//! Worker arguments may reference `{port}`, `{host}` and `{bind}` (`host:port`);
//! the resolved port is also exported to the worker as `PORT`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PORT_ENV};

#[derive(Debug, Error)]
pub enum LaunchError {
  #[error("port bind failure on {target}: {reason}")]
  PortBindFailure { target: String, reason: String },

  #[error("failed to load env file {path}: {source}")]
  EnvFile {
    path: PathBuf,
    #[source]
    source: dotenvy::Error,
  },

  #[error("no worker command given")]
  MissingWorker,

  #[error("failed to run worker {program}: {source}")]
  Worker {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

/// Launcher settings.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
  /// Environment variable holding the port.
  pub port_var: String,
  pub host: String,
  /// Dotenv file loaded before the port is read. Variables already set win.
  pub env_file: Option<PathBuf>,
  /// Worker program followed by its arguments.
  pub worker: Vec<String>,
}

impl Default for LaunchConfig {
  fn default() -> Self {
    Self {
      port_var: DEFAULT_PORT_ENV.to_string(),
      host: DEFAULT_HOST.to_string(),
      env_file: None,
      worker: Vec::new(),
    }
  }
}

/// A verified launch, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
  pub port: u16,
  pub addr: SocketAddr,
  pub argv: Vec<String>,
}

/// Read the port from `var`, falling back to the default when unset or empty.
///
/// # Errors
///
/// [`LaunchError::PortBindFailure`] when the value is not an integer in `1..=65535`.
pub fn resolve_port(var: &str) -> Result<u16, LaunchError> {
  match std::env::var(var) {
    Ok(value) => parse_port(var, &value),
    Err(std::env::VarError::NotPresent) => Ok(DEFAULT_PORT),
    Err(std::env::VarError::NotUnicode(raw)) => Err(LaunchError::PortBindFailure {
      target: format!("${var}"),
      reason: format!("value {raw:?} is not valid UTF-8"),
    }),
  }
}

fn parse_port(var: &str, value: &str) -> Result<u16, LaunchError> {
  let value = value.trim();
  if value.is_empty() {
    return Ok(DEFAULT_PORT);
  }

  match value.parse::<u16>() {
    Ok(0) | Err(_) => Err(LaunchError::PortBindFailure {
      target: format!("${var}"),
      reason: format!("'{value}' is not a port number between 1 and 65535"),
    }),
    Ok(port) => Ok(port),
  }
}

/// Substitute `{port}`, `{host}` and `{bind}` in worker arguments.
pub fn render_worker_args(worker: &[String], host: &str, port: u16) -> Vec<String> {
  let bind = format!("{host}:{port}");
  worker
    .iter()
    .map(|arg| {
      arg
        .replace("{bind}", &bind)
        .replace("{host}", host)
        .replace("{port}", &port.to_string())
    })
    .collect()
}

/// Resolve the port and verify it can be bound, without starting the worker.
pub async fn prepare(config: &LaunchConfig) -> Result<LaunchPlan, LaunchError> {
  if config.worker.is_empty() {
    return Err(LaunchError::MissingWorker);
  }

  if let Some(path) = &config.env_file {
    dotenvy::from_path(path).map_err(|source| LaunchError::EnvFile {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), "loaded env file");
  }

  let port = resolve_port(&config.port_var)?;
  let target = format!("{}:{}", config.host, port);

  // Released immediately; the worker binds the same address.
  let listener = TcpListener::bind(&target)
    .await
    .map_err(|e| LaunchError::PortBindFailure {
      target: target.clone(),
      reason: e.to_string(),
    })?;
  let addr = listener.local_addr().map_err(|e| LaunchError::PortBindFailure {
    target: target.clone(),
    reason: e.to_string(),
  })?;
  drop(listener);

  Ok(LaunchPlan {
    port,
    addr,
    argv: render_worker_args(&config.worker, &config.host, port),
  })
}

/// Start the worker and wait for it to exit.
pub async fn launch(config: &LaunchConfig) -> Result<ExitStatus, LaunchError> {
  let plan = prepare(config).await?;
  let (program, args) = plan.argv.split_first().ok_or(LaunchError::MissingWorker)?;

  info!(port = plan.port, addr = %plan.addr, worker = %program, "starting worker");

  let mut command = Command::new(program);
  command.args(args).env(DEFAULT_PORT_ENV, plan.port.to_string());
  if config.port_var != DEFAULT_PORT_ENV {
    command.env(&config.port_var, plan.port.to_string());
  }

  let status = command
    .status()
    .await
    .map_err(|source| LaunchError::Worker {
      program: program.clone(),
      source,
    })?;

  info!(%status, "worker exited");
  Ok(status)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
  }

  fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port()
  }

  fn config(worker: &[&str]) -> LaunchConfig {
    LaunchConfig {
      host: "127.0.0.1".to_string(),
      worker: worker.iter().map(|s| s.to_string()).collect(),
      ..LaunchConfig::default()
    }
  }

  #[test]
  #[serial]
  fn unset_port_uses_default() {
    temp_env::with_var("PORT", None::<&str>, || {
      assert_eq!(resolve_port("PORT").unwrap(), 10000);
    });
  }

  #[test]
  #[serial]
  fn port_from_environment() {
    temp_env::with_var("PORT", Some("8080"), || {
      assert_eq!(resolve_port("PORT").unwrap(), 8080);
    });
  }

  #[test]
  #[serial]
  fn non_numeric_port_is_a_bind_failure() {
    temp_env::with_var("PORT", Some("not-a-number"), || {
      let err = resolve_port("PORT").unwrap_err();
      assert!(matches!(err, LaunchError::PortBindFailure { .. }));
      assert!(err.to_string().contains("not-a-number"));
    });
  }

  #[test]
  fn out_of_range_ports_are_rejected() {
    for value in ["0", "65536", "-1", "80.5"] {
      assert!(parse_port("PORT", value).is_err(), "{value}");
    }
    assert_eq!(parse_port("PORT", " 443 ").unwrap(), 443);
    assert_eq!(parse_port("PORT", "").unwrap(), DEFAULT_PORT);
  }

  #[test]
  fn worker_args_are_rendered() {
    let argv = render_worker_args(
      &["gunicorn".to_string(), "-b".to_string(), "{bind}".to_string(), "--port={port}".to_string()],
      "0.0.0.0",
      8080,
    );
    assert_eq!(argv, vec!["gunicorn", "-b", "0.0.0.0:8080", "--port=8080"]);
  }

  #[test]
  #[serial]
  fn prepare_checks_the_port() {
    let port = free_port();
    temp_env::with_var("PORT", Some(port.to_string()), || {
      let plan = runtime().block_on(prepare(&config(&["worker", "{bind}"]))).unwrap();
      assert_eq!(plan.port, port);
      assert_eq!(plan.argv, vec!["worker".to_string(), format!("127.0.0.1:{port}")]);
    });
  }

  #[test]
  #[serial]
  fn occupied_port_is_a_bind_failure() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    temp_env::with_var("PORT", Some(port.to_string()), || {
      let err = runtime().block_on(prepare(&config(&["worker"]))).unwrap_err();
      assert!(matches!(err, LaunchError::PortBindFailure { .. }), "{err}");
    });
  }

  #[test]
  fn missing_worker_is_rejected() {
    let err = runtime().block_on(prepare(&config(&[]))).unwrap_err();
    assert!(matches!(err, LaunchError::MissingWorker));
  }

  #[cfg(unix)]
  #[test]
  #[serial]
  fn worker_sees_port_and_exit_status_is_returned() {
    let port = free_port();
    temp_env::with_var("PORT", Some(port.to_string()), || {
      let ok = runtime()
        .block_on(launch(&config(&["/bin/sh", "-c", "test \"$PORT\" = {port}"])))
        .unwrap();
      assert!(ok.success());

      let failed = runtime()
        .block_on(launch(&config(&["/bin/sh", "-c", "exit 3"])))
        .unwrap();
      assert_eq!(failed.code(), Some(3));
    });
  }

  #[test]
  #[serial]
  fn env_file_supplies_port() {
    let temp = tempfile::TempDir::new().unwrap();
    let env_file = temp.path().join(".env");
    let port = free_port();
    std::fs::write(&env_file, format!("ABIFORGE_TEST_PORT={port}\n")).unwrap();

    temp_env::with_var("ABIFORGE_TEST_PORT", None::<&str>, || {
      let config = LaunchConfig {
        port_var: "ABIFORGE_TEST_PORT".to_string(),
        env_file: Some(env_file.clone()),
        ..config(&["worker"])
      };
      let plan = runtime().block_on(prepare(&config)).unwrap();
      assert_eq!(plan.port, port);
    });
  }
}
