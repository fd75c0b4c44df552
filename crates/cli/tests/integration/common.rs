//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Installer whose commands append one line per step to `installed.log` and
/// drop a `site-<name>` file recording the mode that installed each package.
pub const RECORDING_INSTALLER: &str = r#"
[installer]
binary = 'echo "binary $${requirements} $${reinstall}" >> installed.log && for p in $${names}; do echo binary > "site-$p"; done'
source = 'echo "source $${requirements} $${reinstall}" >> installed.log && for p in $${names}; do echo source > "site-$p"; done'
reinstall_flags = "--force-reinstall"
"#;

/// Two ABI-sensitive packages, one forced to build from source.
pub const ABI_MANIFEST: &str = r#"
[base]
id = "python:3.11-slim"
toolchain = "gcc-12"

[[packages]]
name = "numlib"
version = "1.26.4"
abi_sensitive = true
mode = "source"

[[packages]]
name = "nlplib"
version = "3.7.2"
abi_sensitive = true
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory with an isolated layer store.
pub struct TestEnv {
  pub temp: TempDir,
  pub manifest_path: PathBuf,
}

impl TestEnv {
  /// Create an environment whose manifest is `body` plus the recording installer.
  pub fn with_manifest(body: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("abiforge.toml");
    let env = Self { temp, manifest_path };
    env.write_manifest(body);
    env
  }

  /// Create an environment without a manifest.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("abiforge.toml");
    Self { temp, manifest_path }
  }

  /// Replace the manifest, keeping the recording installer.
  pub fn write_manifest(&self, body: &str) {
    std::fs::write(&self.manifest_path, format!("{body}\n{RECORDING_INSTALLER}")).unwrap();
  }

  /// Layer store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Output directory for a named image.
  pub fn out_path(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  /// Get a pre-configured Command for the abiforge binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `ABIFORGE_STORE`: Isolated layer store
  /// - `XDG_DATA_HOME`: Isolated data path, in case the store falls back to it
  pub fn abiforge_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("abiforge");
    cmd.env("ABIFORGE_STORE", self.store_path());
    cmd.env("XDG_DATA_HOME", self.temp.path().join("data"));
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(self.temp.path());
    cmd
  }

  /// Run `build -o json` into `out` and return the parsed image record.
  pub fn build_json(&self, out: &str) -> serde_json::Value {
    let output = self
      .abiforge_cmd()
      .arg("build")
      .arg(&self.manifest_path)
      .arg("--out")
      .arg(self.out_path(out))
      .args(["-o", "json"])
      .output()
      .unwrap();
    assert!(
      output.status.success(),
      "build failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
  }
}
