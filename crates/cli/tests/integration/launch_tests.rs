#![cfg(unix)]

use predicates::prelude::*;

use super::common::TestEnv;

fn free_port() -> u16 {
  std::net::TcpListener::bind("127.0.0.1:0")
    .unwrap()
    .local_addr()
    .unwrap()
    .port()
}

#[test]
fn worker_receives_resolved_port() {
  let env = TestEnv::empty();
  let port = free_port();

  env
    .abiforge_cmd()
    .args(["launch", "--host", "127.0.0.1", "--", "/bin/sh", "-c", "echo \"bound {bind} PORT=$PORT\""])
    .env("PORT", port.to_string())
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("bound 127.0.0.1:{port} PORT={port}")));
}

#[test]
fn worker_exit_code_is_forwarded() {
  let env = TestEnv::empty();

  env
    .abiforge_cmd()
    .args(["launch", "--host", "127.0.0.1", "--", "/bin/sh", "-c", "exit 7"])
    .env("PORT", free_port().to_string())
    .assert()
    .code(7);
}

#[test]
fn occupied_port_fails_without_starting_worker() {
  let env = TestEnv::empty();
  let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let port = holder.local_addr().unwrap().port();
  let marker = env.temp.path().join("started");

  env
    .abiforge_cmd()
    .args(["launch", "--host", "127.0.0.1", "--", "touch"])
    .arg(&marker)
    .env("PORT", port.to_string())
    .assert()
    .code(1)
    .stderr(predicate::str::contains("port bind failure"));

  assert!(!marker.exists());
}

#[test]
fn env_file_supplies_custom_port_variable() {
  let env = TestEnv::empty();
  let port = free_port();
  let env_file = env.temp.path().join(".env");
  std::fs::write(&env_file, format!("APP_PORT={port}\n")).unwrap();

  env
    .abiforge_cmd()
    .args(["launch", "--host", "127.0.0.1", "--port-var", "APP_PORT", "--env-file"])
    .arg(&env_file)
    .args(["--", "/bin/sh", "-c", "echo \"$APP_PORT $PORT\""])
    .env_remove("APP_PORT")
    .env_remove("PORT")
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("{port} {port}")));
}
