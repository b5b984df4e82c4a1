//! Shared helpers for library integration tests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use stagehand_lib::execute::ExecuteConfig;
use stagehand_lib::pipeline::BuildOptions;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Isolated artifact store, work directory and output location.
pub struct Workspace {
  pub temp: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn images_dir(&self) -> PathBuf {
    self.temp.path().join("images")
  }

  pub fn work_dir(&self) -> PathBuf {
    self.temp.path().join("work")
  }

  pub fn output(&self) -> PathBuf {
    self.temp.path().join("out").join("image")
  }

  pub fn options(&self) -> BuildOptions {
    BuildOptions {
      execute: ExecuteConfig {
        shell: None,
        images_dir: self.images_dir(),
        work_dir: self.work_dir(),
        keep_work_dir: false,
      },
      output: self.output(),
    }
  }

  /// Export a pinned image tree into the artifact store.
  pub fn export_image(&self, name: &str, tag: &str, files: &[(&str, &str)]) {
    write_tree(&self.images_dir().join(name).join(tag), files);
  }

  /// Add a package to the local package repository.
  pub fn package(&self, name: &str, files: &[(&str, &str)], depends: &[&str]) {
    let dir = self.repo_dir().join(name);
    write_tree(&dir.join("files"), files);
    if !depends.is_empty() {
      std::fs::write(dir.join("depends"), depends.join("\n")).unwrap();
    }
  }

  pub fn repo_dir(&self) -> PathBuf {
    let dir = self.temp.path().join("repo");
    std::fs::create_dir_all(&dir).unwrap();
    dir
  }

  pub fn repo_url(&self) -> String {
    format!("file://{}", self.repo_dir().display())
  }
}

pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (path, content) in files {
    let file = root.join(path.trim_start_matches('/'));
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, content).unwrap();
  }
}

/// Every regular file under `root`, as in-image paths.
pub fn list_files(root: &Path) -> BTreeSet<String> {
  WalkDir::new(root)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| {
      let rel = e.path().strip_prefix(root).unwrap();
      format!("/{}", rel.to_string_lossy().replace('\\', "/"))
    })
    .collect()
}
