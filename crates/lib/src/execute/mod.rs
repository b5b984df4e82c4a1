//! Stage execution.
//!
//! Realizes the stages of a [`BuildPlan`] in order. Each stage gets its own
//! directory tree under the build's work directory:
//!
//! ```text
//! <work_dir>/<recipe hash>-<pid>/
//!   downloads/              shared download cache
//!   stages/<name>/rootfs/   the stage filesystem
//!   stages/<name>/tmp/      TMPDIR for the stage's commands
//! ```

pub mod actions;
pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::resolve::{BuildPlan, PlannedStage, StageBase};
use crate::source::materialize;
use crate::util::fs::{copy_tree, normalize_image_path, remove_path};
use crate::util::hash::ObjectHash;

use actions::{ActionEnv, copy_artifact};

pub use types::{ActionResult, ErrorKind, ExecuteConfig, ExecuteError, StageOutput};

/// Scratch state of one build.
///
/// Owned by the pipeline and passed by exclusive reference to every step.
#[derive(Debug)]
pub struct BuildContext {
  pub config: ExecuteConfig,
  root: PathBuf,
  realized: HashMap<String, PathBuf>,
}

impl BuildContext {
  /// Create a fresh work directory for a build of `recipe_hash`.
  pub fn new(config: ExecuteConfig, recipe_hash: &ObjectHash) -> std::io::Result<Self> {
    let root = config
      .work_dir
      .join(format!("{}-{}", recipe_hash, std::process::id()));
    if root.exists() {
      warn!(path = ?root, "removing stale work directory");
      remove_path(&root)?;
    }
    std::fs::create_dir_all(&root)?;
    debug!(path = ?root, "created work directory");

    Ok(Self {
      config,
      root,
      realized: HashMap::new(),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn stage_rootfs(&self, stage: &str) -> PathBuf {
    self.root.join("stages").join(stage).join("rootfs")
  }

  pub fn stage_tmp_dir(&self, stage: &str) -> PathBuf {
    self.root.join("stages").join(stage).join("tmp")
  }

  pub fn downloads_dir(&self) -> PathBuf {
    self.root.join("downloads")
  }

  /// Rootfs of an already realized stage.
  pub fn realized(&self, stage: &str) -> Option<&Path> {
    self.realized.get(stage).map(PathBuf::as_path)
  }

  fn record(&mut self, stage: &str, rootfs: PathBuf) {
    self.realized.insert(stage.to_string(), rootfs);
  }

  /// Remove the work directory unless the configuration keeps it.
  pub fn cleanup(self) -> std::io::Result<()> {
    if self.config.keep_work_dir {
      info!(path = ?self.root, "keeping work directory");
      return Ok(());
    }
    remove_path(&self.root)?;
    debug!(path = ?self.root, "removed work directory");
    Ok(())
  }
}

/// Realize one stage into its rootfs.
///
/// The stage's base and copy sources must already be realized in `ctx`.
pub async fn execute_stage(ctx: &mut BuildContext, stage: &PlannedStage) -> Result<StageOutput, ExecuteError> {
  let rootfs = ctx.stage_rootfs(&stage.name);
  let tmp_dir = ctx.stage_tmp_dir(&stage.name);
  let downloads_dir = ctx.downloads_dir();

  remove_path(&rootfs)?;

  match &stage.base {
    StageBase::Source(source) => {
      materialize(source, &ctx.config.images_dir, &rootfs, &downloads_dir).await?;
    }
    StageBase::Stage(base) => {
      let base_rootfs = ctx.realized(base).ok_or_else(|| ExecuteError::MissingArtifact {
        stage: stage.name.clone(),
        from: base.clone(),
        path: "/".to_string(),
      })?;
      let entries = copy_tree(base_rootfs, &rootfs)?;
      debug!(stage = %stage.name, base = %base, entries, "cloned base stage");
    }
  }

  let env = ActionEnv {
    rootfs: &rootfs,
    tmp_dir: &tmp_dir,
    downloads_dir: &downloads_dir,
    shell: ctx.config.shell.as_deref(),
  };

  let mut copied = Vec::with_capacity(stage.copies.len());
  for copy in &stage.copies {
    match (&copy.from, &copy.url) {
      (Some(from), _) => {
        let from_rootfs = ctx.realized(from).ok_or_else(|| ExecuteError::MissingArtifact {
          stage: stage.name.clone(),
          from: from.clone(),
          path: "/".to_string(),
        })?;
        let src = copy.src.as_deref().unwrap_or("/");
        copy_artifact(&stage.name, from, from_rootfs, src, &rootfs, &copy.dest)?;
      }
      (None, Some(url)) => {
        env.fetch(url, copy.sha256.as_deref(), &copy.dest, copy.executable).await?;
      }
      // Rejected during resolution.
      (None, None) => continue,
    }
    copied.push(normalize_image_path(&copy.dest));
  }

  let mut commands = Vec::with_capacity(stage.run.len());
  for cmd in &stage.run {
    commands.push(env.run(cmd, None, None).await?);
  }

  info!(
    stage = %stage.name,
    copies = copied.len(),
    commands = commands.len(),
    "stage realized"
  );

  ctx.record(&stage.name, rootfs.clone());
  Ok(StageOutput {
    name: stage.name.clone(),
    rootfs,
    copied,
    commands,
  })
}

/// Realize every stage of `plan`, in order, stopping at the first failure.
pub async fn execute_plan(ctx: &mut BuildContext, plan: &BuildPlan) -> Result<Vec<StageOutput>, ExecuteError> {
  let mut outputs = Vec::with_capacity(plan.stages.len());

  for (i, stage) in plan.stages.iter().enumerate() {
    debug!(stage = %stage.name, position = i + 1, total = plan.stages.len(), "executing stage");
    let output = execute_stage(ctx, stage)
      .await
      .map_err(|e| ExecuteError::StageFailed {
        stage: stage.name.clone(),
        source: Box::new(e),
      })?;
    outputs.push(output);
  }

  Ok(outputs)
}
