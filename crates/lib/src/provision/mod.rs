//! Provisioning sequencer.
//!
//! Steps mutate the target stage strictly in declaration order. Every step's
//! preconditions are checked against earlier steps' postconditions before
//! anything runs, and cleanup steps are deferred until all other steps have
//! succeeded.

mod packages;
mod types;

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use packages::*;
pub use types::*;

use crate::execute::actions::ActionEnv;
use crate::execute::types::ExecuteError;
use crate::recipe::{ManagerKind, PackageSettings};
use crate::resolve::ConfigError;
use crate::source::{validate_sha256, validate_url};
use crate::util::fs::{is_clean_image_path, join_rooted, normalize_image_path, remove_path, set_mode, unlink_symlink};

/// Why a step list cannot run.
#[derive(Debug, Error)]
pub enum ProvisionError {
  /// An install names an index nothing registers.
  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Config(#[from] ConfigError),
}

/// Check a step list before execution.
///
/// Steps are numbered from 1 in error reports.
///
/// # Errors
///
/// `PackageError::UnregisteredIndex` when an `index:` requirement is not
/// provided by an earlier step or `preinstalled`; a [`ConfigError`] for any
/// other unsatisfied requirement or malformed step.
pub fn validate(steps: &[Step], preinstalled: &[Resource], settings: &PackageSettings) -> Result<(), ProvisionError> {
  let mut available: BTreeSet<Resource> = preinstalled.iter().cloned().collect();

  for (i, step) in steps.iter().enumerate() {
    let index = i + 1;
    check_step(index, step, settings)?;

    for resource in step.requires() {
      if available.contains(&resource) {
        continue;
      }
      return Err(match resource {
        Resource::Index(name) => PackageError::UnregisteredIndex { index: name }.into(),
        other => ConfigError::UnsatisfiedPrecondition {
          index,
          step: step.describe(),
          resource: other,
        }
        .into(),
      });
    }

    available.extend(step.provides());
  }

  debug!(steps = steps.len(), "provisioning steps validated");
  Ok(())
}

fn check_step(index: usize, step: &Step, settings: &PackageSettings) -> Result<(), ConfigError> {
  let invalid = |reason: String| ConfigError::InvalidStep {
    index,
    step: step.describe(),
    reason,
  };
  let clean = |path: &str| {
    if is_clean_image_path(path) {
      Ok(())
    } else {
      Err(ConfigError::InvalidPath {
        context: format!("provisioning step {}", index),
        path: path.to_string(),
      })
    }
  };

  match step {
    Step::RegisterIndex { name, url } => {
      if name.is_empty() || url.is_empty() {
        return Err(invalid("index name and url must not be empty".to_string()));
      }
      if settings.manager == ManagerKind::Directory && !(url.starts_with("file://") || url.starts_with('/')) {
        return Err(invalid(format!("directory indexes need a file:// URL or absolute path, got '{}'", url)));
      }
    }
    Step::Install { packages, .. } => {
      if packages.is_empty() || packages.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid("install needs at least one package name".to_string()));
      }
    }
    Step::Fetch { url, dest, sha256, .. } => {
      let unpinned = |e| ConfigError::Unpinned {
        context: format!("provisioning step {} ({})", index, url),
        source: e,
      };
      validate_url(url).map_err(unpinned)?;
      if let Some(sha256) = sha256 {
        validate_sha256(sha256).map_err(unpinned)?;
      }
      clean(dest)?;
    }
    Step::WriteFile { path, mode, .. } => {
      clean(path)?;
      if let Some(mode) = mode
        && parse_mode(mode).is_none()
      {
        return Err(invalid(format!("'{}' is not an octal file mode", mode)));
      }
    }
    Step::Run { cmd, cwd, .. } => {
      if cmd.trim().is_empty() {
        return Err(invalid("command is empty".to_string()));
      }
      if let Some(cwd) = cwd {
        clean(cwd)?;
      }
    }
    Step::Cleanup { paths } => {
      for path in paths {
        clean(path)?;
        if normalize_image_path(path) == "/" {
          return Err(invalid("refusing to clean up the image root".to_string()));
        }
      }
    }
  }

  Ok(())
}

/// Run validated steps against `env.rootfs`.
///
/// Non-cleanup steps run first, in order. Cleanup steps run afterwards, in
/// order, and only if every other step succeeded.
///
/// # Errors
///
/// `ExecuteError::StepFailed` for the first failing step; no later step runs.
pub async fn run_steps<M: PackageManager>(
  env: ActionEnv<'_>,
  steps: &[Step],
  manager: &mut M,
) -> Result<ProvisionReport, ExecuteError> {
  let mut report = ProvisionReport::default();

  let (cleanups, mutations): (Vec<_>, Vec<_>) = steps.iter().enumerate().partition(|(_, step)| step.is_cleanup());

  for (i, step) in mutations.into_iter().chain(cleanups) {
    let index = i + 1;
    info!(step = index, kind = step.kind(), "{}", step.describe());

    let output = run_step(&env, step, manager, &mut report)
      .await
      .map_err(|e| ExecuteError::StepFailed {
        index,
        step: step.describe(),
        source: Box::new(e),
      })?;

    report.steps.push(StepReport {
      index,
      kind: step.kind(),
      description: step.describe(),
      output,
    });
  }

  info!(steps = report.steps.len(), removed = report.removed.len(), "provisioning complete");
  Ok(report)
}

async fn run_step<M: PackageManager>(
  env: &ActionEnv<'_>,
  step: &Step,
  manager: &mut M,
  report: &mut ProvisionReport,
) -> Result<String, ExecuteError> {
  match step {
    Step::RegisterIndex { name, url } => manager.register_index(env, name, url).await,

    Step::Install { packages, index } => manager.install(env, index.as_deref(), packages).await,

    Step::Fetch {
      url,
      dest,
      sha256,
      executable,
    } => Ok(env.fetch(url, sha256.as_deref(), dest, *executable).await?.output),

    Step::WriteFile { path, content, mode } => {
      let target = rooted(env, path)?;
      if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }
      unlink_symlink(&target)?;
      tokio::fs::write(&target, content).await?;
      if let Some(mode) = mode.as_deref().and_then(parse_mode) {
        set_mode(&target, mode)?;
      }
      debug!(path = %path, bytes = content.len(), "wrote file");
      Ok(target.to_string_lossy().to_string())
    }

    Step::Run { cmd, env: vars, cwd, .. } => Ok(env.run(cmd, Some(vars), cwd.as_deref()).await?.output),

    Step::Cleanup { paths } => {
      let mut removed = Vec::new();
      for path in paths {
        let target = rooted(env, path)?;
        if remove_path(&target)? {
          removed.push(normalize_image_path(path));
        } else {
          debug!(path = %path, "cleanup path already absent");
        }
      }
      if removed.is_empty() {
        warn!(paths = ?paths, "cleanup removed nothing");
      }
      let output = removed.join(" ");
      report.removed.extend(removed);
      Ok(output)
    }
  }
}

fn rooted(env: &ActionEnv<'_>, path: &str) -> Result<std::path::PathBuf, ExecuteError> {
  join_rooted(env.rootfs, path).ok_or_else(|| ExecuteError::PathEscape { path: path.to_string() })
}
