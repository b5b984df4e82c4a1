//! Test fixtures shared by the library's unit tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::execute::actions::ActionEnv;

/// Write `files` (in-image path, content) under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (path, content) in files {
    let file = root.join(path.trim_start_matches('/'));
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, content).unwrap();
  }
}

/// Export a pinned image tree into an artifact store.
pub fn export_image(images_dir: &Path, name: &str, tag: &str, files: &[(&str, &str)]) -> PathBuf {
  let dir = images_dir.join(name).join(tag);
  fs::create_dir_all(&dir).unwrap();
  write_tree(&dir, files);
  dir
}

/// A throwaway stage rootfs with its scratch directories.
pub struct Scratch {
  temp: TempDir,
  pub rootfs: PathBuf,
  pub tmp: PathBuf,
  pub downloads: PathBuf,
}

impl Scratch {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let rootfs = temp.path().join("rootfs");
    fs::create_dir_all(&rootfs).unwrap();
    Self {
      tmp: temp.path().join("tmp"),
      downloads: temp.path().join("downloads"),
      rootfs,
      temp,
    }
  }

  /// A directory next to the rootfs, created on demand.
  pub fn sibling(&self, name: &str) -> PathBuf {
    let dir = self.temp.path().join(name);
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  pub fn env(&self) -> ActionEnv<'_> {
    ActionEnv {
      rootfs: &self.rootfs,
      tmp_dir: &self.tmp,
      downloads_dir: &self.downloads,
      shell: None,
    }
  }
}
