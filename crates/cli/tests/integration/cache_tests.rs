use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn cache_list_json_on_empty_store() {
  let env = TestEnv::empty();

  env
    .abiforge_cmd()
    .args(["cache", "list", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[]"));
}

#[cfg(unix)]
#[test]
fn cache_list_shows_built_layers() {
  let env = TestEnv::with_manifest(super::common::ABI_MANIFEST);
  env.build_json("image");

  let output = env.abiforge_cmd().args(["cache", "list", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let layers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let layers = layers.as_array().unwrap();

  assert_eq!(layers.len(), 2);
  assert!(layers.iter().all(|l| l["status"] == "complete"));

  env
    .abiforge_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("isolated numlib (source)"))
    .stdout(predicate::str::contains("Layers: 2"));
}

#[test]
fn cache_prune_removes_incomplete_layers() {
  let env = TestEnv::empty();
  let broken = env.store_path().join("layers").join("0123456789abcdef0123");
  std::fs::create_dir_all(broken.join("rootfs")).unwrap();
  std::fs::write(broken.join("rootfs").join("half-written"), "x").unwrap();

  env
    .abiforge_cmd()
    .args(["cache", "prune", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"layers_removed\": 1"));

  assert!(!broken.exists());
}
