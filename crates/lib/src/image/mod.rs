//! The produced image: a published rootfs plus its configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::{DEFAULT_SYSTEM_PATH, IMAGE_CONFIG_FILE, ROOTFS_DIR};
use crate::util::fs::{is_executable, resolve_rooted};
use crate::util::hash::{ContentHash, ObjectHash};

/// Environment variable exposing the image rootfs to invoked commands.
pub const ROOT_ENV: &str = "STAGEHAND_ROOT";

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("no image found at {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("image has no default command and none was given")]
  NoCommand,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Runtime defaults fixed into the image, stored as `image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub name: String,
  pub recipe_hash: ObjectHash,
  pub target: String,

  /// Full search path, highest priority first.
  pub path: Vec<String>,

  #[serde(default)]
  pub env: BTreeMap<String, String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,

  #[serde(default)]
  pub volumes: Vec<String>,

  /// Default command. Empty when the image has none.
  #[serde(default)]
  pub cmd: Vec<String>,

  /// Installed packages, sorted.
  #[serde(default)]
  pub packages: Vec<String>,

  /// Stages that were realized, in build order.
  #[serde(default)]
  pub stages: Vec<String>,

  /// Digest of the rootfs contents.
  pub digest: ContentHash,
}

impl ImageConfig {
  pub fn write(&self, image_dir: &Path) -> Result<(), ImageError> {
    let content = serde_json::to_string_pretty(self).map_err(|source| ImageError::Parse {
      path: image_dir.join(IMAGE_CONFIG_FILE),
      source,
    })?;
    std::fs::write(image_dir.join(IMAGE_CONFIG_FILE), content)?;
    Ok(())
  }
}

/// A concrete command ready to be spawned against an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
  /// Resolved program: a file inside the rootfs, or a bare name left to the
  /// search path.
  pub program: PathBuf,
  /// The full command as requested, program name first.
  pub argv: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl Invocation {
  pub fn args(&self) -> &[String] {
    self.argv.get(1..).unwrap_or_default()
  }
}

/// A published image directory.
#[derive(Debug, Clone)]
pub struct Image {
  dir: PathBuf,
  config: ImageConfig,
}

impl Image {
  /// Load the image published at `dir`.
  pub fn load(dir: &Path) -> Result<Self, ImageError> {
    let config_path = dir.join(IMAGE_CONFIG_FILE);
    if !config_path.is_file() || !dir.join(ROOTFS_DIR).is_dir() {
      return Err(ImageError::NotFound(dir.to_path_buf()));
    }

    let content = std::fs::read_to_string(&config_path).map_err(|source| ImageError::Read {
      path: config_path.clone(),
      source,
    })?;
    let config = serde_json::from_str(&content).map_err(|source| ImageError::Parse {
      path: config_path,
      source,
    })?;

    Ok(Self {
      dir: dir.to_path_buf(),
      config,
    })
  }

  pub fn config(&self) -> &ImageConfig {
    &self.config
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn rootfs(&self) -> PathBuf {
    self.dir.join(ROOTFS_DIR)
  }

  /// Search path entries mapped onto the rootfs, followed by the host's
  /// default system path.
  fn host_search_path(&self) -> Vec<PathBuf> {
    let rootfs = self.rootfs();
    self
      .config
      .path
      .iter()
      .filter_map(|entry| resolve_rooted(&rootfs, entry))
      .chain(DEFAULT_SYSTEM_PATH.iter().map(PathBuf::from))
      .collect()
  }

  fn resolve_program(&self, name: &str, cwd: &Path) -> PathBuf {
    if name.starts_with('/') {
      return resolve_rooted(&self.rootfs(), name)
        .filter(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(name));
    }
    if name.contains('/') {
      return cwd.join(name);
    }

    let rootfs = self.rootfs();
    self
      .config
      .path
      .iter()
      .filter_map(|entry| resolve_rooted(&rootfs, Path::new(entry).join(name)))
      .find(|candidate| is_executable(candidate))
      .unwrap_or_else(|| PathBuf::from(name))
  }

  /// Build the invocation for `override_cmd`, or the default command when the
  /// override is empty.
  ///
  /// # Errors
  ///
  /// [`ImageError::NoCommand`] when neither is present.
  pub fn invocation(&self, override_cmd: &[String]) -> Result<Invocation, ImageError> {
    let argv: Vec<String> = if override_cmd.is_empty() {
      self.config.cmd.clone()
    } else {
      override_cmd.to_vec()
    };
    let Some(name) = argv.first() else {
      return Err(ImageError::NoCommand);
    };

    let rootfs = self.rootfs();
    let cwd = self
      .config
      .workdir
      .as_deref()
      .and_then(|w| resolve_rooted(&rootfs, w))
      .unwrap_or_else(|| rootfs.clone());

    let search_path = self
      .host_search_path()
      .iter()
      .map(|p| p.to_string_lossy().to_string())
      .collect::<Vec<_>>()
      .join(":");

    let mut env = self.config.env.clone();
    env.insert("PATH".to_string(), search_path);
    env.insert(ROOT_ENV.to_string(), rootfs.to_string_lossy().to_string());

    let program = self.resolve_program(name, &cwd);
    debug!(program = ?program, cwd = ?cwd, "resolved invocation");

    Ok(Invocation {
      program,
      argv,
      env,
      cwd,
    })
  }
}

/// Spawn an invocation and wait for it, inheriting stdio.
pub async fn run_invocation(invocation: &Invocation) -> Result<ExitStatus, ImageError> {
  info!(argv = ?invocation.argv, "running image command");

  let status = Command::new(&invocation.program)
    .args(invocation.args())
    .env_clear()
    .envs(&invocation.env)
    .current_dir(&invocation.cwd)
    .status()
    .await?;

  debug!(status = ?status, "image command exited");
  Ok(status)
}
