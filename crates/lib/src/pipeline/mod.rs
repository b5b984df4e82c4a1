//! Build pipeline.
//!
//! Drives a recipe through `Declared -> Resolving -> Provisioning ->
//! Finalized`. Any failure moves the build to `Failed`; nothing is published
//! in that case and the work directory is removed on both paths unless it is
//! explicitly kept.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::consts::ROOTFS_DIR;
use crate::execute::actions::ActionEnv;
use crate::execute::{BuildContext, ErrorKind, ExecuteConfig, ExecuteError, StageOutput, execute_plan};
use crate::finalize::{finalize, validate_defaults};
use crate::image::{Image, ImageConfig, ImageError};
use crate::provision::{
  AnyPackageManager, PackageError, ProvisionError, ProvisionReport, run_steps, seed_database, validate,
};
use crate::recipe::{Recipe, RecipeError, load_recipe};
use crate::resolve::{BuildPlan, ConfigError, resolve};
use crate::util::fs::{copy_tree, remove_path};

/// Lifecycle of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
  Declared,
  Resolving,
  Provisioning,
  Finalized,
  Failed,
}

impl BuildState {
  /// Whether `next` directly follows `self`.
  pub fn can_advance_to(self, next: BuildState) -> bool {
    use BuildState::*;
    matches!(
      (self, next),
      (Declared, Resolving) | (Resolving, Provisioning) | (Provisioning, Finalized)
    ) || (next == Failed && self != Failed)
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, BuildState::Finalized | BuildState::Failed)
  }
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildState::Declared => "declared",
      BuildState::Resolving => "resolving",
      BuildState::Provisioning => "provisioning",
      BuildState::Finalized => "finalized",
      BuildState::Failed => "failed",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Recipe(#[from] RecipeError),

  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigError),

  #[error("package install error: {0}")]
  PackageInstall(#[from] PackageError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error("image error: {0}")]
  Image(#[from] ImageError),

  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("output {0} exists and is not an image; refusing to replace it")]
  OutputOccupied(PathBuf),

  #[error("invalid build state transition {from} -> {to}")]
  InvalidTransition { from: BuildState, to: BuildState },
}

impl From<ProvisionError> for BuildError {
  fn from(err: ProvisionError) -> Self {
    match err {
      ProvisionError::Package(e) => BuildError::PackageInstall(e),
      ProvisionError::Config(e) => BuildError::Configuration(e),
    }
  }
}

impl BuildError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      BuildError::Recipe(_) | BuildError::Configuration(_) => ErrorKind::Configuration,
      BuildError::PackageInstall(_) => ErrorKind::PackageInstall,
      BuildError::Execute(e) => e.kind(),
      BuildError::Image(_)
      | BuildError::Io { .. }
      | BuildError::OutputOccupied(_)
      | BuildError::InvalidTransition { .. } => ErrorKind::Execution,
    }
  }

  /// Index of the failing provisioning step, if a step failed.
  pub fn failed_step(&self) -> Option<usize> {
    match self {
      BuildError::Execute(e) => e.failed_step(),
      _ => None,
    }
  }
}

/// Tracks the current state and every state the build passed through.
#[derive(Debug, Clone)]
pub struct StateTracker {
  current: BuildState,
  history: Vec<BuildState>,
}

impl Default for StateTracker {
  fn default() -> Self {
    Self {
      current: BuildState::Declared,
      history: vec![BuildState::Declared],
    }
  }
}

impl StateTracker {
  pub fn current(&self) -> BuildState {
    self.current
  }

  pub fn history(&self) -> &[BuildState] {
    &self.history
  }

  pub fn advance(&mut self, next: BuildState) -> Result<(), BuildError> {
    if !self.current.can_advance_to(next) {
      return Err(BuildError::InvalidTransition {
        from: self.current,
        to: next,
      });
    }
    debug!(from = %self.current, to = %next, "build state transition");
    self.current = next;
    self.history.push(next);
    Ok(())
  }
}

/// Settings for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub execute: ExecuteConfig,
  /// Directory the image is published to.
  pub output: PathBuf,
}

/// A successful build.
#[derive(Debug)]
pub struct BuildOutcome {
  pub image: Image,
  pub plan: BuildPlan,
  pub stages: Vec<StageOutput>,
  pub provision: ProvisionReport,
  pub duration: Duration,
  pub states: Vec<BuildState>,
}

/// Resolve the recipe and validate everything that can be checked without
/// executing anything.
pub fn plan(recipe: &Recipe) -> Result<BuildPlan, BuildError> {
  let plan = resolve(recipe)?;
  validate(&recipe.provision, &recipe.preinstalled, &recipe.packages)?;
  validate_defaults(&recipe.environment)?;
  Ok(plan)
}

/// Build and publish the image described by `recipe`.
pub async fn build(recipe: &Recipe, options: &BuildOptions) -> Result<BuildOutcome, BuildError> {
  let started = Instant::now();
  let mut states = StateTracker::default();
  info!(recipe = %recipe.name, output = ?options.output, "starting build");

  match run_build(recipe, options, &mut states).await {
    Ok((plan, stages, provision, image)) => {
      let duration = started.elapsed();
      info!(image = %image.config().name, digest = %image.config().digest, ?duration, "build finalized");
      Ok(BuildOutcome {
        image,
        plan,
        stages,
        provision,
        duration,
        states: states.history().to_vec(),
      })
    }
    Err(err) => {
      let failed_in = states.current();
      // Failed is reachable from every live state.
      let _ = states.advance(BuildState::Failed);
      error!(state = %failed_in, kind = %err.kind(), error = %err, "build failed");
      Err(err)
    }
  }
}

/// Load a recipe file and build it.
pub async fn build_file(path: &Path, options: &BuildOptions) -> Result<BuildOutcome, BuildError> {
  let recipe = load_recipe(path)?;
  build(&recipe, options).await
}

type Built = (BuildPlan, Vec<StageOutput>, ProvisionReport, Image);

async fn run_build(recipe: &Recipe, options: &BuildOptions, states: &mut StateTracker) -> Result<Built, BuildError> {
  states.advance(BuildState::Resolving)?;
  let plan = plan(recipe)?;

  let mut ctx = BuildContext::new(options.execute.clone(), &plan.recipe_hash).map_err(|source| BuildError::Io {
    path: options.execute.work_dir.clone(),
    source,
  })?;

  let result = realize(recipe, &plan, &mut ctx, &options.output, states).await;

  if let Err(e) = ctx.cleanup() {
    warn!(error = %e, "failed to remove work directory");
  }

  let (stages, provision, image) = result?;
  Ok((plan, stages, provision, image))
}

async fn realize(
  recipe: &Recipe,
  plan: &BuildPlan,
  ctx: &mut BuildContext,
  output: &Path,
  states: &mut StateTracker,
) -> Result<(Vec<StageOutput>, ProvisionReport, Image), BuildError> {
  let stages = execute_plan(ctx, plan).await?;

  states.advance(BuildState::Provisioning)?;
  let rootfs = ctx
    .realized(&plan.target)
    .map(Path::to_path_buf)
    .ok_or_else(|| ExecuteError::MissingArtifact {
      stage: plan.target.clone(),
      from: plan.target.clone(),
      path: "/".to_string(),
    })?;

  seed_database(&rootfs, &recipe.preinstalled)?;

  let tmp_dir = ctx.stage_tmp_dir(&plan.target);
  let downloads_dir = ctx.downloads_dir();
  let env = ActionEnv {
    rootfs: &rootfs,
    tmp_dir: &tmp_dir,
    downloads_dir: &downloads_dir,
    shell: ctx.config.shell.as_deref(),
  };
  let mut manager = AnyPackageManager::from_settings(&recipe.packages);
  let provision = run_steps(env, &recipe.provision, &mut manager).await?;

  let config = finalize(&rootfs, recipe, plan)?;
  states.advance(BuildState::Finalized)?;

  let image = publish(&rootfs, &config, output)?;
  Ok((stages, provision, image))
}

/// Move a finished rootfs and its configuration to `output`.
///
/// The image is assembled in a hidden staging directory next to `output` and
/// renamed into place, so `output` never holds a partial image. An existing
/// image at `output` is replaced.
pub fn publish(rootfs: &Path, config: &ImageConfig, output: &Path) -> Result<Image, BuildError> {
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source: std::io::Error| BuildError::Io { path, source }
  };

  let parent = match output.parent() {
    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
    _ => PathBuf::from("."),
  };
  std::fs::create_dir_all(&parent).map_err(io_err(&parent))?;

  if output.exists() {
    let replaceable = Image::load(output).is_ok()
      || std::fs::read_dir(output).is_ok_and(|mut entries| entries.next().is_none());
    if !replaceable {
      return Err(BuildError::OutputOccupied(output.to_path_buf()));
    }
  }

  let staging = tempfile::Builder::new()
    .prefix(".stagehand-")
    .tempdir_in(&parent)
    .map_err(io_err(&parent))?;
  let staged = staging.path().join("image");

  copy_tree(rootfs, &staged.join(ROOTFS_DIR)).map_err(io_err(&staged))?;
  config.write(&staged)?;

  remove_path(output).map_err(io_err(output))?;
  std::fs::rename(&staged, output).map_err(io_err(output))?;
  debug!(output = ?output, "published image");

  Ok(Image::load(output)?)
}
