//! Test utilities for abiforge-lib.
//!
//! Manifest fixtures whose installer templates write plain files instead of
//! calling a real package manager, so tests can observe install order on disk.

use crate::manifest::{AuxiliaryArtifact, BaseEnvironment, BuildMode, InstallerConfig, Manifest, PackageSpec};

/// Installer whose commands append one line per step to `$ABIFORGE_ROOT/installed.log`
/// and drop a marker file per package recording the build mode that installed it.
pub fn recording_installer() -> InstallerConfig {
  InstallerConfig {
    binary: "echo \"binary $${requirements} $${reinstall}\" >> installed.log && \
             for p in $${names}; do echo binary > \"site-$p\"; done"
      .to_string(),
    source: "echo \"source $${requirements} $${reinstall}\" >> installed.log && \
             for p in $${names}; do echo source > \"site-$p\"; done"
      .to_string(),
    reinstall_flags: "--force-reinstall".to_string(),
  }
}

pub fn base(id: &str) -> BaseEnvironment {
  BaseEnvironment {
    id: id.to_string(),
    toolchain: Some("gcc-12".to_string()),
    root: None,
    path: None,
  }
}

pub fn pkg(name: &str, version: &str) -> PackageSpec {
  PackageSpec {
    name: name.to_string(),
    version: version.to_string(),
    mode: None,
    abi_sensitive: false,
    priority: None,
    reinstall: false,
  }
}

pub fn abi_pkg(name: &str, version: &str, mode: Option<BuildMode>) -> PackageSpec {
  PackageSpec {
    abi_sensitive: true,
    mode,
    ..pkg(name, version)
  }
}

pub fn manifest(packages: Vec<PackageSpec>, artifacts: Vec<AuxiliaryArtifact>) -> Manifest {
  Manifest {
    base: base("python:3.11-slim"),
    packages,
    artifacts,
    installer: recording_installer(),
    ..Manifest::default()
  }
}

/// Serve `body` with `status` for the next `times` HTTP requests on a local port.
///
/// Returns the base URL, e.g. `http://127.0.0.1:40123`. Any path is accepted.
pub async fn serve_http(status: u16, body: Vec<u8>, times: usize) -> String {
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    for _ in 0..times {
      let Ok((mut socket, _)) = listener.accept().await else {
        return;
      };
      let mut request = vec![0u8; 4096];
      let _ = socket.read(&mut request).await;

      let head = format!(
        "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        body.len()
      );
      let _ = socket.write_all(head.as_bytes()).await;
      let _ = socket.write_all(&body).await;
      let _ = socket.shutdown().await;
    }
  });

  format!("http://{addr}")
}
