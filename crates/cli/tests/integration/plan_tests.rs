//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_stages_in_dependency_order() {
  let env = TestEnv::from_fixture("staged.toml");

  env
    .stagehand_cmd()
    .arg("plan")
    .arg(&env.recipe_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Target: Final"))
    .stdout(predicate::str::contains("Stages: 4"))
    .stdout(predicate::str::contains("1: A, B, base"))
    .stdout(predicate::str::contains("2: Final"));
}

#[test]
fn plan_json_is_machine_readable() {
  let env = TestEnv::from_fixture("staged.toml");

  let output = env
    .stagehand_cmd()
    .arg("plan")
    .arg(&env.recipe_path)
    .arg("--json")
    .output()
    .unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["plan"]["target"], "Final");
  assert_eq!(report["plan"]["stages"].as_array().unwrap().len(), 4);
  assert_eq!(report["provision"].as_array().unwrap().len(), 2);
  assert_eq!(report["environment"]["workdir"], "/srv");
}

#[test]
fn plan_does_not_need_the_artifact_store() {
  // Nothing is exported: planning never touches images.
  let env = TestEnv::from_fixture("staged.toml");

  env.stagehand_cmd().arg("plan").arg(&env.recipe_path).assert().success();
}

#[test]
fn plan_rejects_floating_tags() {
  let env = TestEnv::from_fixture("floating.toml");

  env
    .stagehand_cmd()
    .arg("plan")
    .arg(&env.recipe_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("floating tag"));
}

#[test]
fn plan_rejects_unregistered_index() {
  let env = TestEnv::from_fixture("unregistered.toml");

  env
    .stagehand_cmd()
    .arg("plan")
    .arg(&env.recipe_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("not registered"));
}
