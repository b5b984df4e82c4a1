use stagehand_lib::execute::ErrorKind;
use stagehand_lib::pipeline::build;
use stagehand_lib::recipe::parse_toml;
use stagehand_lib::util::hash::hash_bytes;

use super::common::Workspace;

const BINARY: &[u8] = b"#!/bin/sh\necho kubectl v1.30.2\n";

#[tokio::test]
async fn url_sources_and_fetch_steps_are_verified() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let mut server = mockito::Server::new_async().await;
  let tool = server
    .mock("GET", "/tool-b-2.0.1")
    .with_body("tool-b")
    .create_async()
    .await;
  let kubectl = server
    .mock("GET", "/kubectl-1.30.2")
    .with_body(BINARY)
    .create_async()
    .await;

  let recipe = parse_toml(&format!(
    r#"
name = "fetches"

[[stage]]
name = "B"
source = {{ url = "{url}/tool-b-2.0.1", sha256 = "{tool_sha}", dest = "/bin/tool-b" }}

[[stage]]
name = "base"
source = {{ image = "base", tag = "12.5" }}

[[stage]]
name = "final"
from = "base"
copy = [{{ from = "B", src = "/bin/tool-b", dest = "/usr/local/bin/tool-b" }}]

[[provision]]
kind = "fetch"
url = "{url}/kubectl-1.30.2"
sha256 = "{kubectl_sha}"
dest = "/opt/tools/bin/kubectl"
executable = true

[environment]
path = ["/opt/tools/bin"]
"#,
    url = server.url(),
    tool_sha = hash_bytes(b"tool-b"),
    kubectl_sha = hash_bytes(BINARY),
  ))
  .unwrap();

  let outcome = build(&recipe, &ws.options()).await.unwrap();

  let rootfs = outcome.image.rootfs();
  assert_eq!(std::fs::read_to_string(rootfs.join("usr/local/bin/tool-b")).unwrap(), "tool-b");
  assert_eq!(std::fs::read(rootfs.join("opt/tools/bin/kubectl")).unwrap(), BINARY);
  assert_eq!(outcome.image.config().path[0], "/opt/tools/bin");
  tool.assert_async().await;
  kubectl.assert_async().await;
}

#[tokio::test]
async fn checksum_mismatch_is_a_network_error() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let mut server = mockito::Server::new_async().await;
  server
    .mock("GET", "/kubectl-1.30.2")
    .with_body("tampered")
    .create_async()
    .await;

  let recipe = parse_toml(&format!(
    r#"
name = "tampered"

[[stage]]
name = "base"
source = {{ image = "base", tag = "12.5" }}

[[provision]]
kind = "fetch"
url = "{url}/kubectl-1.30.2"
sha256 = "{sha}"
dest = "/opt/tools/bin/kubectl"

[[provision]]
kind = "cleanup"
paths = ["/etc/os-release"]
"#,
    url = server.url(),
    sha = hash_bytes(BINARY),
  ))
  .unwrap();

  let err = build(&recipe, &ws.options()).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Network);
  assert_eq!(err.failed_step(), Some(1));
  assert!(!ws.output().exists());
}

#[tokio::test]
async fn cleanup_runs_after_everything_else() {
  let ws = Workspace::new();
  ws.export_image(
    "base",
    "12.5",
    &[("/etc/os-release", "base"), ("/var/cache/apt/pkgcache.bin", "cache")],
  );
  let recipe = parse_toml(
    r#"
name = "cleanup"
preinstalled = ["index:debian"]

[[stage]]
name = "base"
source = { image = "base", tag = "12.5" }

[[provision]]
kind = "cleanup"
paths = ["/var/cache/apt", "/tmp/never-existed"]

[[provision]]
kind = "install"
index = "debian"
packages = ["ca-certificates"]

[[provision]]
kind = "write_file"
path = "/etc/app.conf"
content = "telemetry = false\n"
"#,
  )
  .unwrap();

  let outcome = build(&recipe, &ws.options()).await.unwrap();

  let order: Vec<usize> = outcome.provision.steps.iter().map(|s| s.index).collect();
  assert_eq!(order, vec![2, 3, 1]);
  assert_eq!(outcome.provision.removed, vec!["/var/cache/apt"]);
  let rootfs = outcome.image.rootfs();
  assert!(!rootfs.join("var/cache/apt").exists());
  assert!(rootfs.join("etc/app.conf").is_file());
  assert_eq!(outcome.image.config().packages, vec!["ca-certificates"]);
}

#[cfg(unix)]
#[tokio::test]
async fn shell_manager_uses_recipe_templates() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let recipe = parse_toml(
    r#"
name = "templates"

[[stage]]
name = "base"
source = { image = "base", tag = "12.5" }

[packages]
register = "mkdir -p $root/etc/indexes && echo {url} > $root/etc/indexes/{name}"
install = "echo {index}: {packages} >> $root/etc/installed"

[[provision]]
kind = "register_index"
name = "nodesource"
url = "https://deb.example.com/node_20.x"

[[provision]]
kind = "install"
index = "nodesource"
packages = ["nodejs", "npm"]

[[provision]]
kind = "install"
index = "nodesource"
packages = ["nodejs"]
"#,
  )
  .unwrap();

  let outcome = build(&recipe, &ws.options()).await.unwrap();

  let rootfs = outcome.image.rootfs();
  assert_eq!(
    std::fs::read_to_string(rootfs.join("etc/indexes/nodesource")).unwrap(),
    "https://deb.example.com/node_20.x\n"
  );
  // The second install finds nodejs already present and runs nothing.
  assert_eq!(
    std::fs::read_to_string(rootfs.join("etc/installed")).unwrap(),
    "nodesource: nodejs npm\n"
  );
}

#[cfg(unix)]
#[tokio::test]
async fn failing_run_step_skips_cleanup() {
  let ws = Workspace::new();
  ws.export_image("base", "12.5", &[("/etc/os-release", "base")]);
  let mut options = ws.options();
  options.execute.keep_work_dir = true;
  let recipe = parse_toml(
    r#"
name = "fail"

[[stage]]
name = "base"
source = { image = "base", tag = "12.5" }

[[provision]]
kind = "run"
cmd = "exit 9"

[[provision]]
kind = "cleanup"
paths = ["/etc/os-release"]
"#,
  )
  .unwrap();

  let err = build(&recipe, &options).await.unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Execution);
  assert_eq!(err.failed_step(), Some(1));
  assert!(!ws.output().exists());

  // The kept work directory shows the cleanup never ran.
  let kept = std::fs::read_dir(ws.work_dir()).unwrap().next().unwrap().unwrap().path();
  assert!(kept.join("stages/base/rootfs/etc/os-release").exists());
}
