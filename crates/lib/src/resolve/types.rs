//! Types produced by stage resolution.

use serde::Serialize;
use thiserror::Error;

use crate::provision::Resource;
use crate::recipe::CopySpec;
use crate::source::{ArtifactSource, PinError};
use crate::util::hash::ObjectHash;

/// A malformed, cyclic or unpinned build description.
///
/// Always raised before any stage executes.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("recipe declares no stages")]
  EmptyRecipe,

  #[error("invalid stage name '{0}': use letters, digits, '.', '-' or '_'")]
  InvalidStageName(String),

  #[error("stage '{0}' is declared more than once")]
  DuplicateStage(String),

  #[error("stage '{stage}' must declare exactly one of `source` or `from`")]
  InvalidBase { stage: String },

  #[error("stage '{stage}' has a pinned source and cannot also copy files or run commands")]
  SourceWithLayers { stage: String },

  #[error("stage '{stage}' references '{reference}', which is not declared before it")]
  UnknownStage { stage: String, reference: String },

  #[error("stage '{stage}' references itself")]
  SelfReference { stage: String },

  #[error("stage '{stage}' copy #{index}: {reason}")]
  InvalidCopy { stage: String, index: usize, reason: String },

  #[error("invalid path '{path}' in {context}: paths must be absolute and stay inside the image")]
  InvalidPath { context: String, path: String },

  #[error("stage '{stage}' copies more than one artifact to {dest}; set overwrite = true to replace it")]
  DestinationCollision { stage: String, dest: String },

  #[error("{context} is not pinned: {source}")]
  Unpinned {
    context: String,
    #[source]
    source: PinError,
  },

  #[error("target stage '{0}' is not declared")]
  UnknownTarget(String),

  #[error("dependency cycle detected at stage '{0}'")]
  Cycle(String),

  #[error("provisioning step {index} ({step}) requires {resource}, which no earlier step provides")]
  UnsatisfiedPrecondition {
    index: usize,
    step: String,
    resource: Resource,
  },

  #[error("provisioning step {index} ({step}): {reason}")]
  InvalidStep { index: usize, step: String, reason: String },

  #[error("invalid environment: {0}")]
  InvalidEnvironment(String),

  #[error("failed to hash recipe: {0}")]
  Hash(#[from] serde_json::Error),
}

/// What a planned stage starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageBase {
  /// A pinned external artifact.
  Source(ArtifactSource),
  /// The filesystem of an earlier stage.
  Stage(String),
}

/// One stage in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStage {
  pub name: String,
  pub base: StageBase,
  pub copies: Vec<CopySpec>,
  pub run: Vec<String>,
  /// Stages that must be realized before this one, in declaration order.
  pub depends_on: Vec<String>,
}

impl PlannedStage {
  pub fn is_external(&self) -> bool {
    matches!(self.base, StageBase::Source(_))
  }
}

/// A deterministic, topologically ordered build plan.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
  /// Recipe name.
  pub name: String,

  /// Hash of the recipe the plan was resolved from.
  pub recipe_hash: ObjectHash,

  /// Stage that becomes the image.
  pub target: String,

  /// Stages to realize, dependencies first.
  pub stages: Vec<PlannedStage>,

  /// Groups of stages whose dependencies are all in earlier groups.
  /// An external orchestrator may build each group in parallel.
  pub waves: Vec<Vec<String>>,

  /// Declared stages the target does not depend on. They are not built.
  pub unused: Vec<String>,
}

impl BuildPlan {
  pub fn stage(&self, name: &str) -> Option<&PlannedStage> {
    self.stages.iter().find(|s| s.name == name)
  }

  pub fn target_stage(&self) -> Option<&PlannedStage> {
    self.stage(&self.target)
  }
}
