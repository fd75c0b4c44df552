#![cfg(unix)]

use predicates::prelude::*;

use super::common::{ABI_MANIFEST, TestEnv};

fn statuses(image: &serde_json::Value) -> Vec<String> {
  image["steps"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s["status"].as_str().unwrap().to_string())
    .collect()
}

#[test]
fn build_writes_rootfs_and_image_record() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  let image = env.build_json("image");

  assert_eq!(statuses(&image), vec!["executed", "executed"]);
  assert_eq!(image["base"], "python:3.11-slim");
  assert_eq!(image["packages"]["numlib"]["mode"], "source");
  assert_eq!(image["packages"]["nlplib"]["mode"], "binary");

  let rootfs = env.out_path("image").join("rootfs");
  assert_eq!(std::fs::read_to_string(rootfs.join("site-numlib")).unwrap(), "source\n");
  assert_eq!(std::fs::read_to_string(rootfs.join("site-nlplib")).unwrap(), "binary\n");

  let record = std::fs::read_to_string(env.out_path("image").join("image.json")).unwrap();
  let on_disk: serde_json::Value = serde_json::from_str(&record).unwrap();
  assert_eq!(on_disk, image);
}

#[test]
fn second_build_reuses_every_layer() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  env.build_json("first");
  let second = env.build_json("second");

  assert_eq!(statuses(&second), vec!["cached", "cached"]);
}

#[test]
fn version_bump_only_reruns_the_changed_step_and_after() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);
  env.build_json("first");

  env.write_manifest(&ABI_MANIFEST.replace("3.7.2", "3.7.5"));
  let second = env.build_json("second");

  assert_eq!(statuses(&second), vec!["cached", "executed"]);
  let log = std::fs::read_to_string(env.out_path("second").join("rootfs/installed.log")).unwrap();
  assert!(log.contains("nlplib==3.7.5"), "{log}");
  assert!(!log.contains("nlplib==3.7.2"), "{log}");
}

#[test]
fn text_output_reports_counts() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  env
    .abiforge_cmd()
    .arg("build")
    .arg(&env.manifest_path)
    .arg("--out")
    .arg(env.out_path("image"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Build complete"))
    .stdout(predicate::str::contains("isolated numlib (source)"))
    .stdout(predicate::str::contains("Executed: 2"));
}

#[test]
fn default_output_directory_is_image() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  env.abiforge_cmd().arg("build").assert().success();

  assert!(env.temp.path().join("image/image.json").exists());
}

#[test]
fn conflicting_manifest_fails_before_executing() {
  let env = TestEnv::with_manifest(
    r#"
[base]
id = "python:3.11-slim"

[[packages]]
name = "numlib"
version = "1.26.4"
mode = "source"

[[packages]]
name = "numlib"
version = "1.26.4"
mode = "binary"
"#,
  );

  env
    .abiforge_cmd()
    .arg("build")
    .arg(&env.manifest_path)
    .arg("--out")
    .arg(env.out_path("image"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("manifest conflict for 'numlib'"));

  assert!(!env.out_path("image").exists());
}

#[test]
fn failed_check_keeps_earlier_layers() {
  let env = TestEnv::with_manifest(&format!("checks = [\"exit 9\"]\n{ABI_MANIFEST}"));

  env
    .abiforge_cmd()
    .arg("build")
    .arg(&env.manifest_path)
    .arg("--out")
    .arg(env.out_path("image"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("step #3"));
  assert!(!env.out_path("image").join("image.json").exists());

  env.write_manifest(&format!("checks = [\"test -f site-numlib\"]\n{ABI_MANIFEST}"));
  let image = env.build_json("image");
  assert_eq!(statuses(&image), vec!["cached", "cached", "executed"]);
}
