//! Inspect and run command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn inspect_shows_environment_defaults() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();
  let image = env.build();

  env
    .stagehand_cmd()
    .arg("inspect")
    .arg(&image)
    .assert()
    .success()
    .stdout(predicate::str::contains("Image staged"))
    .stdout(predicate::str::contains("Workdir: /srv"))
    .stdout(predicate::str::contains("/data"));
}

#[test]
fn inspect_json_round_trips_config() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();
  let image = env.build();

  let output = env.stagehand_cmd().arg("inspect").arg(&image).arg("--json").output().unwrap();
  assert!(output.status.success());

  let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(config["name"], "staged");
  assert_eq!(config["stages"].as_array().unwrap().len(), 4);
}

#[test]
fn inspect_missing_image_fails() {
  let env = TestEnv::from_fixture("staged.toml");

  env
    .stagehand_cmd()
    .arg("inspect")
    .arg(env.temp.path().join("nope"))
    .assert()
    .failure();
}

#[test]
fn run_without_command_fails() {
  let env = TestEnv::from_fixture("staged.toml");
  env.seed_staged();
  let image = env.build();

  env
    .stagehand_cmd()
    .arg("run")
    .arg(&image)
    .assert()
    .failure()
    .stderr(predicate::str::contains("Nothing to run"));
}

#[cfg(unix)]
#[test]
fn run_uses_default_command() {
  let env = TestEnv::from_fixture("override.toml");
  env.seed_base();
  let image = env.build();

  env.stagehand_cmd().arg("run").arg(&image).assert().success();

  let ran = std::fs::read_to_string(image.join("rootfs/ran")).unwrap();
  assert_eq!(ran.trim(), "cmd0");
}

#[cfg(unix)]
#[test]
fn run_override_replaces_default_command() {
  let env = TestEnv::from_fixture("override.toml");
  env.seed_base();
  let image = env.build();

  env.stagehand_cmd().arg("run").arg(&image).arg("--").arg("cmd1").assert().code(7);

  let ran = std::fs::read_to_string(image.join("rootfs/ran")).unwrap();
  assert_eq!(ran.trim(), "cmd1");
}
