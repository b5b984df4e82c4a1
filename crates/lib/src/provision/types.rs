//! Provisioning step and resource types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::fs::normalize_image_path;

/// Something a provisioning step needs or leaves behind.
///
/// Written as `index:<name>`, `package:<name>` or `file:<absolute path>` in
/// recipes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resource {
  Index(String),
  Package(String),
  File(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource '{0}': expected index:<name>, package:<name> or file:<path>")]
pub struct ResourceParseError(pub String);

impl FromStr for Resource {
  type Err = ResourceParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || ResourceParseError(s.to_string());
    let (kind, value) = s.split_once(':').ok_or_else(err)?;
    if value.is_empty() {
      return Err(err());
    }
    match kind {
      "index" => Ok(Resource::Index(value.to_string())),
      "package" => Ok(Resource::Package(value.to_string())),
      "file" if value.starts_with('/') => Ok(Resource::File(normalize_image_path(value))),
      _ => Err(err()),
    }
  }
}

impl TryFrom<String> for Resource {
  type Error = ResourceParseError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Resource> for String {
  fn from(value: Resource) -> Self {
    value.to_string()
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Resource::Index(name) => write!(f, "index:{}", name),
      Resource::Package(name) => write!(f, "package:{}", name),
      Resource::File(path) => write!(f, "file:{}", path),
    }
  }
}

/// One ordered mutation of the target stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
  /// Make a package index available to later installs.
  RegisterIndex { name: String, url: String },

  /// Install a batch of packages. Any failing package fails the batch.
  Install {
    packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<String>,
  },

  /// Download a pinned binary and place it inside the image.
  Fetch {
    url: String,
    dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(default)]
    executable: bool,
  },

  /// Write a configuration file.
  WriteFile {
    path: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
  },

  /// Run a shell command against the target rootfs.
  Run {
    cmd: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    requires: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    provides: Vec<Resource>,
  },

  /// Remove caches and temp files once everything else succeeded.
  Cleanup { paths: Vec<String> },
}

impl Step {
  /// Resources that must exist before this step runs.
  pub fn requires(&self) -> Vec<Resource> {
    match self {
      Step::Install { index: Some(index), .. } => vec![Resource::Index(index.clone())],
      Step::Run { requires, .. } => requires.clone(),
      _ => Vec::new(),
    }
  }

  /// Resources this step leaves behind.
  pub fn provides(&self) -> Vec<Resource> {
    match self {
      Step::RegisterIndex { name, .. } => vec![Resource::Index(name.clone())],
      Step::Install { packages, .. } => packages.iter().map(|p| Resource::Package(p.clone())).collect(),
      Step::Fetch { dest, .. } => vec![Resource::File(normalize_image_path(dest))],
      Step::WriteFile { path, .. } => vec![Resource::File(normalize_image_path(path))],
      Step::Run { provides, .. } => provides.clone(),
      Step::Cleanup { .. } => Vec::new(),
    }
  }

  pub fn is_cleanup(&self) -> bool {
    matches!(self, Step::Cleanup { .. })
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Step::RegisterIndex { .. } => "register_index",
      Step::Install { .. } => "install",
      Step::Fetch { .. } => "fetch",
      Step::WriteFile { .. } => "write_file",
      Step::Run { .. } => "run",
      Step::Cleanup { .. } => "cleanup",
    }
  }

  /// Short human-readable summary used in logs and error reports.
  pub fn describe(&self) -> String {
    match self {
      Step::RegisterIndex { name, url } => format!("register index {} ({})", name, url),
      Step::Install { packages, index } => match index {
        Some(index) => format!("install {} from {}", packages.join(", "), index),
        None => format!("install {}", packages.join(", ")),
      },
      Step::Fetch { url, dest, .. } => format!("fetch {} -> {}", url, dest),
      Step::WriteFile { path, .. } => format!("write {}", path),
      Step::Run { cmd, .. } => {
        let first = cmd.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
        format!("run {}", first)
      }
      Step::Cleanup { paths } => format!("cleanup {}", paths.join(", ")),
    }
  }
}

impl fmt::Display for Step {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.describe())
  }
}

/// Parse an octal mode string such as `0644`, `755` or `0o600`.
pub fn parse_mode(mode: &str) -> Option<u32> {
  let digits = mode.trim().trim_start_matches("0o");
  if digits.is_empty() {
    return None;
  }
  u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
  pub index: usize,
  pub kind: &'static str,
  pub description: String,
  /// Output of the step (stdout for commands, written path for files).
  pub output: String,
}

/// Outcome of a whole provisioning run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
  pub steps: Vec<StepReport>,
  /// Paths that cleanup steps actually removed.
  pub removed: Vec<String>,
}
