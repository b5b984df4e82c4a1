//! Stage resolution.
//!
//! Turns the declared stages of a recipe into a validated, deterministic
//! [`BuildPlan`]. Resolution never touches the filesystem or network: whether
//! a copied path actually exists is only known once its stage has run.

mod dag;
mod types;

use std::collections::HashSet;

use tracing::{debug, info};

pub use dag::StageGraph;
pub use types::*;

use crate::recipe::{CopySpec, Recipe, StageDef};
use crate::source::{ArtifactSource, validate_sha256, validate_url};
use crate::util::fs::{is_clean_image_path, normalize_image_path};
use crate::util::hash::Hashable;

/// Validate the recipe's stages and produce the plan for its target.
///
/// # Errors
///
/// Any [`ConfigError`] describing the first problem found, in declaration
/// order.
pub fn resolve(recipe: &Recipe) -> Result<BuildPlan, ConfigError> {
  if recipe.stages.is_empty() {
    return Err(ConfigError::EmptyRecipe);
  }

  let mut declared: HashSet<&str> = HashSet::new();
  for stage in &recipe.stages {
    validate_stage(stage, &declared)?;
    declared.insert(stage.name.as_str());
  }

  let target = recipe
    .target_name()
    .ok_or(ConfigError::EmptyRecipe)?
    .to_string();
  if !declared.contains(target.as_str()) {
    return Err(ConfigError::UnknownTarget(target));
  }

  let graph = StageGraph::from_stages(&recipe.stages)?;
  let needed: HashSet<String> = graph.closure(&target).into_iter().collect();

  let stages: Vec<PlannedStage> = graph
    .topological_order()?
    .into_iter()
    .filter(|name| needed.contains(name))
    .filter_map(|name| recipe.stage(&name))
    .map(|def| plan_stage(def, &graph))
    .collect();

  let waves: Vec<Vec<String>> = graph
    .waves()?
    .into_iter()
    .map(|wave| wave.into_iter().filter(|name| needed.contains(name)).collect::<Vec<_>>())
    .filter(|wave| !wave.is_empty())
    .collect();

  let unused: Vec<String> = recipe
    .stages
    .iter()
    .filter(|s| !needed.contains(&s.name))
    .map(|s| s.name.clone())
    .collect();

  for name in &unused {
    debug!(stage = %name, "stage is not needed by the target, skipping");
  }

  let plan = BuildPlan {
    name: recipe.name.clone(),
    recipe_hash: recipe.compute_hash()?,
    target,
    stages,
    waves,
    unused,
  };

  info!(
    target = %plan.target,
    stages = plan.stages.len(),
    waves = plan.waves.len(),
    hash = %plan.recipe_hash,
    "resolved build plan"
  );

  Ok(plan)
}

fn plan_stage(def: &StageDef, graph: &StageGraph) -> PlannedStage {
  let base = match (&def.source, &def.from) {
    (Some(source), _) => StageBase::Source(source.clone()),
    (None, Some(from)) => StageBase::Stage(from.clone()),
    // Rejected during validation.
    (None, None) => StageBase::Stage(String::new()),
  };

  PlannedStage {
    name: def.name.clone(),
    base,
    copies: def.copy.clone(),
    run: def.run.clone(),
    depends_on: graph.dependencies(&def.name),
  }
}

fn valid_stage_name(name: &str) -> bool {
  !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_stage(stage: &StageDef, declared: &HashSet<&str>) -> Result<(), ConfigError> {
  if !valid_stage_name(&stage.name) {
    return Err(ConfigError::InvalidStageName(stage.name.clone()));
  }
  if declared.contains(stage.name.as_str()) {
    return Err(ConfigError::DuplicateStage(stage.name.clone()));
  }

  match (&stage.source, &stage.from) {
    (Some(source), None) => {
      if !stage.copy.is_empty() || !stage.run.is_empty() {
        return Err(ConfigError::SourceWithLayers {
          stage: stage.name.clone(),
        });
      }
      validate_source(&stage.name, source)
    }
    (None, Some(from)) => {
      check_reference(&stage.name, from, declared)?;
      validate_copies(stage, declared)
    }
    _ => Err(ConfigError::InvalidBase {
      stage: stage.name.clone(),
    }),
  }
}

fn validate_source(stage: &str, source: &ArtifactSource) -> Result<(), ConfigError> {
  source.validate().map_err(|e| ConfigError::Unpinned {
    context: format!("stage '{}' source {}", stage, source.reference()),
    source: e,
  })?;

  if let ArtifactSource::Url { dest, .. } = source
    && !is_clean_image_path(dest)
  {
    return Err(ConfigError::InvalidPath {
      context: format!("stage '{}' source", stage),
      path: dest.clone(),
    });
  }

  Ok(())
}

fn check_reference(stage: &str, reference: &str, declared: &HashSet<&str>) -> Result<(), ConfigError> {
  if reference == stage {
    return Err(ConfigError::SelfReference {
      stage: stage.to_string(),
    });
  }
  if !declared.contains(reference) {
    return Err(ConfigError::UnknownStage {
      stage: stage.to_string(),
      reference: reference.to_string(),
    });
  }
  Ok(())
}

fn validate_copies(stage: &StageDef, declared: &HashSet<&str>) -> Result<(), ConfigError> {
  let mut destinations: HashSet<String> = HashSet::new();

  for (index, copy) in stage.copy.iter().enumerate() {
    let invalid = |reason: &str| ConfigError::InvalidCopy {
      stage: stage.name.clone(),
      index,
      reason: reason.to_string(),
    };

    match (&copy.from, &copy.url) {
      (Some(from), None) => {
        check_reference(&stage.name, from, declared)?;
        let src = copy.src.as_deref().ok_or_else(|| invalid("copies from a stage need a `src` path"))?;
        check_path(stage, index, src)?;
        if copy.sha256.is_some() {
          return Err(invalid("`sha256` only applies to url copies"));
        }
      }
      (None, Some(url)) => {
        if copy.src.is_some() {
          return Err(invalid("url copies take no `src` path"));
        }
        validate_url_copy(stage, copy, url)?;
      }
      _ => return Err(invalid("declare exactly one of `from` or `url`")),
    }

    check_path(stage, index, &copy.dest)?;

    let dest = normalize_image_path(&copy.dest);
    if !destinations.insert(dest.clone()) && !copy.overwrite {
      return Err(ConfigError::DestinationCollision {
        stage: stage.name.clone(),
        dest,
      });
    }
  }

  Ok(())
}

fn validate_url_copy(stage: &StageDef, copy: &CopySpec, url: &str) -> Result<(), ConfigError> {
  let unpinned = |e| ConfigError::Unpinned {
    context: format!("stage '{}' copy of {}", stage.name, url),
    source: e,
  };

  validate_url(url).map_err(unpinned)?;
  if let Some(sha256) = &copy.sha256 {
    validate_sha256(sha256).map_err(unpinned)?;
  }
  Ok(())
}

fn check_path(stage: &StageDef, index: usize, path: &str) -> Result<(), ConfigError> {
  if is_clean_image_path(path) {
    Ok(())
  } else {
    Err(ConfigError::InvalidPath {
      context: format!("stage '{}' copy #{}", stage.name, index),
      path: path.to_string(),
    })
  }
}
