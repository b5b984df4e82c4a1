//! Environment finalization.
//!
//! Runs after provisioning and fixes the runtime defaults of the image: the
//! search path, working directory, volume mount points and default command.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::consts::DEFAULT_SYSTEM_PATH;
use crate::execute::ExecuteError;
use crate::image::ImageConfig;
use crate::provision::PackageDb;
use crate::recipe::{EnvironmentDefaults, Recipe};
use crate::resolve::{BuildPlan, ConfigError};
use crate::util::fs::{is_clean_image_path, normalize_image_path, resolve_rooted};
use crate::util::hash::digest_tree;

/// Reject environment defaults that cannot be applied.
pub fn validate_defaults(defaults: &EnvironmentDefaults) -> Result<(), ConfigError> {
  let invalid_path = |context: &str, path: &str| ConfigError::InvalidPath {
    context: context.to_string(),
    path: path.to_string(),
  };

  for entry in &defaults.path {
    if !is_clean_image_path(entry) || entry.contains(':') {
      return Err(invalid_path("environment.path", entry));
    }
  }

  for volume in &defaults.volumes {
    if !is_clean_image_path(volume) || normalize_image_path(volume) == "/" {
      return Err(invalid_path("environment.volumes", volume));
    }
  }

  if let Some(workdir) = &defaults.workdir
    && !is_clean_image_path(workdir)
  {
    return Err(invalid_path("environment.workdir", workdir));
  }

  for key in defaults.env.keys() {
    if key.is_empty() || key.contains('=') || key == "PATH" {
      return Err(ConfigError::InvalidEnvironment(format!(
        "'{}' cannot be set in environment.env (use environment.path for the search path)",
        key
      )));
    }
  }

  if defaults.cmd.first().is_some_and(|c| c.trim().is_empty()) {
    return Err(ConfigError::InvalidEnvironment("default command has an empty program".to_string()));
  }

  Ok(())
}

/// Prepend `entries` to the default system path, dropping duplicates.
pub fn search_path(entries: &[String]) -> Vec<String> {
  let mut seen = HashSet::new();
  entries
    .iter()
    .map(|e| normalize_image_path(e))
    .chain(DEFAULT_SYSTEM_PATH.iter().map(|e| e.to_string()))
    .filter(|e| seen.insert(e.clone()))
    .collect()
}

fn ensure_dir(rootfs: &Path, path: &str) -> Result<(), ExecuteError> {
  let dir = resolve_rooted(rootfs, path).ok_or_else(|| ExecuteError::PathEscape { path: path.to_string() })?;
  std::fs::create_dir_all(dir)?;
  Ok(())
}

/// Apply the recipe's environment defaults to the target rootfs and produce
/// the image configuration.
pub fn finalize(rootfs: &Path, recipe: &Recipe, plan: &BuildPlan) -> Result<ImageConfig, ExecuteError> {
  let defaults = &recipe.environment;
  let path = search_path(&defaults.path);

  for entry in &defaults.path {
    let exists = resolve_rooted(rootfs, entry).is_some_and(|p| p.is_dir());
    if !exists {
      warn!(entry = %entry, "search path entry does not exist in the image");
    }
  }

  for volume in &defaults.volumes {
    ensure_dir(rootfs, volume)?;
    let populated = resolve_rooted(rootfs, volume)
      .and_then(|dir| std::fs::read_dir(dir).ok())
      .is_some_and(|mut entries| entries.next().is_some());
    if populated {
      warn!(volume = %volume, "volume mount point is not empty; its contents are hidden when mounted");
    }
  }

  if let Some(workdir) = &defaults.workdir {
    ensure_dir(rootfs, workdir)?;
  }

  if defaults.cmd.is_empty() {
    warn!("image has no default command");
  }

  let packages = PackageDb::load(rootfs)?.package_names();
  let digest = digest_tree(rootfs)?;

  let config = ImageConfig {
    name: recipe.name.clone(),
    recipe_hash: plan.recipe_hash.clone(),
    target: plan.target.clone(),
    path,
    env: defaults.env.clone(),
    workdir: defaults.workdir.as_deref().map(normalize_image_path),
    volumes: defaults.volumes.iter().map(|v| normalize_image_path(v)).collect(),
    cmd: defaults.cmd.clone(),
    packages,
    stages: plan.stages.iter().map(|s| s.name.clone()).collect(),
    digest,
  };

  info!(image = %config.name, digest = %config.digest, "environment finalized");
  Ok(config)
}
