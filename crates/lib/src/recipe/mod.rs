//! Recipe loading.
//!
//! Recipes are TOML documents; files ending in `.json` are read as JSON.

mod types;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use types::{CopySpec, EnvironmentDefaults, ManagerKind, PackageSettings, Recipe, StageDef};

/// Errors reading or parsing a recipe file.
#[derive(Debug, Error)]
pub enum RecipeError {
  #[error("recipe not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read recipe {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid TOML recipe: {0}")]
  Toml(#[from] toml::de::Error),

  #[error("invalid JSON recipe: {0}")]
  Json(#[from] serde_json::Error),
}

/// Load a recipe from disk, picking the format from the file extension.
pub fn load_recipe(path: &Path) -> Result<Recipe, RecipeError> {
  if !path.exists() {
    return Err(RecipeError::NotFound(path.to_path_buf()));
  }

  let content = std::fs::read_to_string(path).map_err(|source| RecipeError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  debug!(path = %path.display(), "loaded recipe file");

  if path.extension().is_some_and(|ext| ext == "json") {
    parse_json(&content)
  } else {
    parse_toml(&content)
  }
}

pub fn parse_toml(content: &str) -> Result<Recipe, RecipeError> {
  Ok(toml::from_str(content)?)
}

pub fn parse_json(content: &str) -> Result<Recipe, RecipeError> {
  Ok(serde_json::from_str(content)?)
}
