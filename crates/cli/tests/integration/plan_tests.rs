use predicates::prelude::*;

use super::common::{ABI_MANIFEST, TestEnv};

fn plan_json(env: &TestEnv) -> Vec<serde_json::Value> {
  let output = env
    .abiforge_cmd()
    .arg("plan")
    .arg(&env.manifest_path)
    .args(["-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  serde_json::from_slice::<serde_json::Value>(&output.stdout)
    .unwrap()
    .as_array()
    .unwrap()
    .clone()
}

#[test]
fn plan_lists_steps_in_order() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  let steps = plan_json(&env);

  assert_eq!(steps.len(), 2);
  assert_eq!(steps[0]["ordinal"], 1);
  assert_eq!(steps[0]["kind"], "isolated");
  assert_eq!(steps[0]["label"], "isolated numlib (source)");
  assert_eq!(steps[1]["label"], "isolated nlplib (binary)");
  assert!(steps.iter().all(|s| s["cached"] == false));
}

#[test]
fn plan_text_output() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);

  env
    .abiforge_cmd()
    .arg("plan")
    .arg(&env.manifest_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Build plan (2 steps)"))
    .stdout(predicate::str::contains("#2 isolated nlplib (binary)"))
    .stdout(predicate::str::contains("To execute: 2"));
}

#[test]
fn plan_with_no_packages_has_nothing_to_build() {
  let env = TestEnv::with_manifest("[base]\nid = \"python:3.11-slim\"\n");

  env
    .abiforge_cmd()
    .arg("plan")
    .arg(&env.manifest_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to build"));
}

#[cfg(unix)]
#[test]
fn plan_marks_cached_steps_after_build() {
  let env = TestEnv::with_manifest(ABI_MANIFEST);
  env.build_json("image");

  let steps = plan_json(&env);

  assert!(steps.iter().all(|s| s["cached"] == true));
}

#[test]
fn plan_reports_conflicts() {
  let env = TestEnv::with_manifest(
    r#"
[base]
id = "python:3.11-slim"

[[packages]]
name = "numlib"
reinstall = true
"#,
  );

  env
    .abiforge_cmd()
    .arg("plan")
    .arg(&env.manifest_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("manifest conflict"));
}

#[test]
fn json_manifest_is_accepted() {
  let env = TestEnv::empty();
  let path = env.temp.path().join("abiforge.json");
  std::fs::write(
    &path,
    r#"{"base": {"id": "python:3.11-slim"}, "packages": [{"name": "requests", "version": "2.31.0"}]}"#,
  )
  .unwrap();

  env
    .abiforge_cmd()
    .arg("plan")
    .arg(&path)
    .assert()
    .success()
    .stdout(predicate::str::contains("batch requests (binary)"));
}
