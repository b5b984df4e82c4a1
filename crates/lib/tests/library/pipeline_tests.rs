use std::collections::BTreeSet;

use stagehand_lib::consts::PACKAGE_DB_PATH;
use stagehand_lib::execute::ErrorKind;
use stagehand_lib::pipeline::{BuildError, BuildState, build, plan};
use stagehand_lib::recipe::parse_toml;

use super::common::{Workspace, list_files};

fn abc_recipe(ws: &Workspace) -> String {
  format!(
    r#"
name = "abc"

[[stage]]
name = "A"
source = {{ image = "tool-a", tag = "1.4.2" }}

[[stage]]
name = "B"
source = {{ image = "tool-b", tag = "2.0.1" }}

[[stage]]
name = "base"
source = {{ image = "base", tag = "12.5" }}

[[stage]]
name = "Final"
from = "base"
copy = [
  {{ from = "A", src = "/x", dest = "/usr/local/bin/x" }},
  {{ from = "B", src = "/y", dest = "/usr/local/bin/y" }},
]

[packages]
manager = "directory"

[[provision]]
kind = "register_index"
name = "local"
url = '{}'

[[provision]]
kind = "install"
index = "local"
packages = ["p1", "p2"]
"#,
    ws.repo_url()
  )
}

fn seed_abc(ws: &Workspace) {
  ws.export_image("tool-a", "1.4.2", &[("/x", "x"), ("/a-extra", "a")]);
  ws.export_image("tool-b", "2.0.1", &[("/y", "y"), ("/b-extra", "b")]);
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  ws.package("p1", &[("/usr/lib/p1/lib.so", "p1")], &[]);
  ws.package("p2", &[("/usr/lib/p2/lib.so", "p2")], &["p1"]);
}

#[tokio::test]
async fn final_stage_contains_only_selected_artifacts() {
  let ws = Workspace::new();
  seed_abc(&ws);
  let recipe = parse_toml(&abc_recipe(&ws)).unwrap();

  let outcome = build(&recipe, &ws.options()).await.unwrap();

  let files = list_files(&outcome.image.rootfs());
  let expected: BTreeSet<String> = [
    "/etc/os-release",
    "/usr/local/bin/x",
    "/usr/local/bin/y",
    "/usr/lib/p1/lib.so",
    "/usr/lib/p2/lib.so",
  ]
  .into_iter()
  .map(String::from)
  .chain([format!("/{}", PACKAGE_DB_PATH)])
  .collect();
  assert_eq!(files, expected);

  let config = outcome.image.config();
  assert_eq!(config.packages, vec!["p1", "p2"]);
  assert_eq!(config.stages, vec!["A", "B", "base", "Final"]);
  assert_eq!(
    outcome.states,
    vec![
      BuildState::Declared,
      BuildState::Resolving,
      BuildState::Provisioning,
      BuildState::Finalized
    ]
  );
  assert_eq!(outcome.provision.steps.len(), 2);
}

#[tokio::test]
async fn rebuilding_is_reproducible() {
  let ws = Workspace::new();
  seed_abc(&ws);
  let recipe = parse_toml(&abc_recipe(&ws)).unwrap();

  let first = build(&recipe, &ws.options()).await.unwrap();
  let first_digest = first.image.config().digest.clone();
  let second = build(&recipe, &ws.options()).await.unwrap();

  assert_eq!(second.image.config().digest, first_digest);
  assert_eq!(second.plan.recipe_hash, first.plan.recipe_hash);
}

#[tokio::test]
async fn work_dir_is_removed_after_success() {
  let ws = Workspace::new();
  seed_abc(&ws);
  let recipe = parse_toml(&abc_recipe(&ws)).unwrap();

  build(&recipe, &ws.options()).await.unwrap();

  assert_eq!(std::fs::read_dir(ws.work_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn unregistered_index_fails_before_any_step() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let recipe = parse_toml(
    r#"
name = "unregistered"

[[stage]]
name = "base"
source = { image = "base", tag = "12.5" }

[[provision]]
kind = "write_file"
path = "/etc/before"
content = "first"

[[provision]]
kind = "install"
index = "nodesource"
packages = ["nodejs"]

[[provision]]
kind = "write_file"
path = "/etc/after"
content = "never"
"#,
  )
  .unwrap();

  let err = build(&recipe, &ws.options()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::PackageInstall);
  assert!(matches!(err, BuildError::PackageInstall(_)));
  assert!(!ws.output().exists());
}

#[tokio::test]
async fn package_failure_during_execution_stops_later_steps() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  ws.package("p1", &[("/usr/lib/p1/lib.so", "p1")], &[]);
  let recipe = parse_toml(&format!(
    r#"
name = "missing-package"

[[stage]]
name = "base"
source = {{ image = "base", tag = "12.5" }}

[packages]
manager = "directory"

[[provision]]
kind = "register_index"
name = "local"
url = '{}'

[[provision]]
kind = "install"
index = "local"
packages = ["p1", "does-not-exist"]

[[provision]]
kind = "write_file"
path = "/etc/after"
content = "never"
"#,
    ws.repo_url()
  ))
  .unwrap();

  let err = build(&recipe, &ws.options()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::PackageInstall);
  assert_eq!(err.failed_step(), Some(2));
  assert!(!ws.output().exists());
}

#[tokio::test]
async fn missing_copy_source_fails_the_build() {
  let ws = Workspace::new();
  seed_abc(&ws);
  ws.export_image("tool-b", "2.0.1", &[("/not-y", "?")]);
  std::fs::remove_file(ws.images_dir().join("tool-b/2.0.1/y")).unwrap();
  let recipe = parse_toml(&abc_recipe(&ws)).unwrap();

  let err = build(&recipe, &ws.options()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::MissingArtifact);
  assert!(err.to_string().contains("/y"));
  assert!(!ws.output().exists());
}

#[test]
fn plan_restricts_to_target_ancestors() {
  let ws = Workspace::new();
  let mut recipe = parse_toml(&abc_recipe(&ws)).unwrap();
  recipe.target = Some("A".to_string());

  let plan = plan(&recipe).unwrap();

  assert_eq!(plan.stages.len(), 1);
  assert_eq!(plan.unused, vec!["B", "base", "Final"]);
}

#[cfg(unix)]
#[tokio::test]
async fn override_command_runs_instead_of_default() {
  use stagehand_lib::image::run_invocation;

  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let recipe = parse_toml(
    r##"
name = "override"

[[stage]]
name = "base"
source = { image = "base", tag = "12.5" }

[[provision]]
kind = "write_file"
path = "/opt/app/bin/cmd0"
content = "#!/bin/sh\necho cmd0 > \"$STAGEHAND_ROOT/ran\"\n"
mode = "0755"

[[provision]]
kind = "write_file"
path = "/opt/app/bin/cmd1"
content = "#!/bin/sh\necho cmd1 > \"$STAGEHAND_ROOT/ran\"\n"
mode = "0755"

[environment]
path = ["/opt/app/bin"]
cmd = ["cmd0"]
"##,
  )
  .unwrap();

  let outcome = build(&recipe, &ws.options()).await.unwrap();
  let image = outcome.image;
  let marker = image.rootfs().join("ran");

  let status = run_invocation(&image.invocation(&["cmd1".to_string()]).unwrap())
    .await
    .unwrap();
  assert!(status.success());
  assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "cmd1");

  run_invocation(&image.invocation(&[]).unwrap()).await.unwrap();
  assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "cmd0");
}
