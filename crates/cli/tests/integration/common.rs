//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Isolated test environment.
///
/// Each test gets its own artifact store, work dir and output location.
pub struct TestEnv {
  pub temp: TempDir,
  pub recipe_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture recipe, copied into the temp directory.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let recipe_path = temp.path().join(name);
    std::fs::copy(fixture_path(name), &recipe_path)
      .unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e));
    Self { temp, recipe_path }
  }

  /// Artifact store holding exported images.
  pub fn images_dir(&self) -> PathBuf {
    let p = self.temp.path().join("images");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn work_dir(&self) -> PathBuf {
    let p = self.temp.path().join("work");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Where `build` publishes the image. Not created up front.
  pub fn output_path(&self) -> PathBuf {
    self.temp.path().join("out").join("image")
  }

  /// Export an image tree into the store at `<images>/<name>/<tag>`.
  pub fn export_image(&self, name: &str, tag: &str, files: &[(&str, &str)]) {
    let root = self.images_dir().join(name).join(tag);
    std::fs::create_dir_all(&root).unwrap();
    for (path, content) in files {
      let target = root.join(path.trim_start_matches('/'));
      std::fs::create_dir_all(target.parent().unwrap()).unwrap();
      std::fs::write(target, content).unwrap();
    }
  }

  /// Get a pre-configured Command for the stagehand binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `STAGEHAND_IMAGES_DIR`: Isolated artifact store
  /// - `STAGEHAND_WORK_DIR`: Isolated scratch directory
  /// - `XDG_DATA_HOME` / `XDG_CACHE_HOME`: Keep defaults out of the real home
  pub fn stagehand_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("stagehand");
    cmd.env("STAGEHAND_IMAGES_DIR", self.images_dir());
    cmd.env("STAGEHAND_WORK_DIR", self.work_dir());
    cmd.env("XDG_DATA_HOME", self.temp.path().join("data"));
    cmd.env("XDG_CACHE_HOME", self.temp.path().join("cache"));
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Build the fixture and return the published image path.
  pub fn build(&self) -> PathBuf {
    let output = self.output_path();
    self
      .stagehand_cmd()
      .arg("build")
      .arg(&self.recipe_path)
      .arg("--output")
      .arg(&output)
      .assert()
      .success();
    output
  }

  pub fn seed_staged(&self) {
    self.export_image("tool-a", "1.4.2", &[("/x", "x"), ("/a-extra", "a")]);
    self.export_image("tool-b", "2.0.1", &[("/y", "y"), ("/b-extra", "b")]);
    self.seed_base();
  }

  pub fn seed_base(&self) {
    self.export_image("base", "12.5", &[("/etc/os-release", "base"), ("/var/cache/apt/pkgcache", "c")]);
  }
}
