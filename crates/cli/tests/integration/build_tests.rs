//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_publishes_final_stage() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();

  env
    .stagehand_cmd()
    .arg("build")
    .arg(&env.recipe_path)
    .arg("--output")
    .arg(env.output_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Built staged"))
    .stdout(predicate::str::contains("Stages realized: 4"))
    .stdout(predicate::str::contains("/var/cache/apt"));

  let rootfs = env.output_path().join("rootfs");
  assert_eq!(std::fs::read_to_string(rootfs.join("usr/local/bin/x")).unwrap(), "x");
  assert_eq!(std::fs::read_to_string(rootfs.join("usr/local/bin/y")).unwrap(), "y");
  assert_eq!(std::fs::read_to_string(rootfs.join("etc/motd")).unwrap(), "hello");
  assert!(!rootfs.join("a-extra").exists());
  assert!(!rootfs.join("b-extra").exists());
  assert!(!rootfs.join("var/cache/apt").exists());
  assert!(rootfs.join("data").is_dir());
  assert!(rootfs.join("srv").is_dir());
  assert!(env.output_path().join("image.json").is_file());
}

#[test]
fn build_cleans_work_dir() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();

  env.build();

  assert_eq!(std::fs::read_dir(env.work_dir()).unwrap().count(), 0);
}

#[test]
fn build_keep_work_dir_leaves_stage_trees() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();

  env
    .stagehand_cmd()
    .arg("build")
    .arg(&env.recipe_path)
    .arg("--output")
    .arg(env.output_path())
    .arg("--keep-work-dir")
    .assert()
    .success();

  assert_eq!(std::fs::read_dir(env.work_dir()).unwrap().count(), 1);
}

#[test]
fn build_json_reports_states() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();

  let output = env
    .stagehand_cmd()
    .arg("build")
    .arg(&env.recipe_path)
    .arg("--output")
    .arg(env.output_path())
    .arg("--json")
    .output()
    .unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let states: Vec<&str> = report["states"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s.as_str().unwrap())
    .collect();
  assert_eq!(states, vec!["declared", "resolving", "provisioning", "finalized"]);
  assert_eq!(report["config"]["target"], "Final");
}

#[test]
fn build_missing_image_is_missing_artifact() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_base();

  env
    .stagehand_cmd()
    .arg("build")
    .arg(&env.recipe_path)
    .arg("--output")
    .arg(env.output_path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing artifact"));

  assert!(!env.output_path().exists());
}

#[test]
fn build_unregistered_index_stops_before_later_steps() {
  let env = TestEnv::from_fixture("unregistered.toml");
  env.seed_base();

  env
    .stagehand_cmd()
    .arg("build")
    .arg(&env.recipe_path)
    .arg("--output")
    .arg(env.output_path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("package install error"))
    .stderr(predicate::str::contains("nodesource"));

  assert!(!env.output_path().exists());
}
