//! Recipe data model.
//!
//! A recipe is fully static: stages, provisioning steps and environment
//! defaults are all known once the file is parsed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provision::{Resource, Step};
use crate::source::ArtifactSource;
use crate::util::hash::Hashable;

/// A complete build recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
  pub name: String,

  /// Stage that becomes the image. Defaults to the last declared stage.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,

  #[serde(default, rename = "stage")]
  pub stages: Vec<StageDef>,

  /// How package steps talk to the package ecosystem.
  #[serde(default)]
  pub packages: PackageSettings,

  /// Resources the target's base already provides (e.g. `index:debian`).
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub preinstalled: Vec<Resource>,

  /// Ordered provisioning steps applied to the target stage.
  #[serde(default)]
  pub provision: Vec<Step>,

  #[serde(default)]
  pub environment: EnvironmentDefaults,
}

impl Hashable for Recipe {}

impl Recipe {
  /// Name of the stage that becomes the image.
  pub fn target_name(&self) -> Option<&str> {
    self
      .target
      .as_deref()
      .or_else(|| self.stages.last().map(|s| s.name.as_str()))
  }

  pub fn stage(&self, name: &str) -> Option<&StageDef> {
    self.stages.iter().find(|s| s.name == name)
  }
}

/// A named stage: either a pinned external source, or a prior stage with
/// copies and commands layered on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDef {
  pub name: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<ArtifactSource>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub copy: Vec<CopySpec>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub run: Vec<String>,
}

impl StageDef {
  /// Stages this stage reads from: its base and every copy source.
  pub fn stage_references(&self) -> Vec<&str> {
    let mut refs: Vec<&str> = self.from.iter().map(String::as_str).collect();
    refs.extend(self.copy.iter().filter_map(|c| c.from.as_deref()));
    refs
  }
}

/// An artifact reference: a path pulled from another stage or a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySpec {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,

  /// Path inside the source stage. Required for stage copies.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub src: Option<String>,

  pub dest: String,

  /// Allow this copy to replace an earlier copy's destination.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub overwrite: bool,

  /// Mark a URL copy executable after download.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub executable: bool,
}

impl CopySpec {
  /// Where the artifact comes from, for logs.
  pub fn origin(&self) -> String {
    match (&self.from, &self.url) {
      (Some(from), _) => format!("{}:{}", from, self.src.as_deref().unwrap_or("/")),
      (None, Some(url)) => url.clone(),
      (None, None) => "<none>".to_string(),
    }
  }
}

/// Which package manager backs `register_index` and `install` steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
  /// Indexes and installs are delegated to shell command templates. Without
  /// templates only the package database is updated.
  #[default]
  Shell,
  /// Indexes are local package directories (`file://` URLs or absolute paths).
  Directory,
}

/// Package manager settings.
///
/// Shell templates support `{name}`, `{url}`, `{index}` and `{packages}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSettings {
  #[serde(default)]
  pub manager: ManagerKind,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub register: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub install: Option<String>,
}

/// Process-wide defaults inherited by every execution of the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDefaults {
  /// Entries prepended to the default search path.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub path: Vec<String>,

  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub env: BTreeMap<String, String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,

  /// Mount points for external mutable state.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub volumes: Vec<String>,

  /// Default command when the caller does not give one.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub cmd: Vec<String>,
}
