//! Package index and install support.
//!
//! Every rootfs carries a small package database recording which indexes are
//! registered and which packages are installed. Managers consult it so that
//! re-applying a step is a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::PACKAGE_DB_PATH;
use crate::execute::actions::ActionEnv;
use crate::execute::types::ExecuteError;
use crate::recipe::{ManagerKind, PackageSettings};
use crate::util::fs::{copy_tree, join_rooted, unlink_symlink};

use super::types::Resource;

/// URL recorded for indexes the base image already ships with.
const PREINSTALLED: &str = "preinstalled";

/// Failures talking to the package ecosystem.
#[derive(Debug, Error)]
pub enum PackageError {
  #[error("package index '{index}' is not registered")]
  UnregisteredIndex { index: String },

  #[error("package '{package}' not found in {index}")]
  NotFound { package: String, index: String },

  #[error("cannot install '{package}': {reason}")]
  DependencyConflict { package: String, reason: String },

  #[error("failed to register index '{name}': {message}")]
  RegisterFailed { name: String, message: String },

  #[error("failed to install {packages}: {message}")]
  InstallFailed { packages: String, message: String },

  #[error("package database {path}: {message}")]
  Database { path: PathBuf, message: String },
}

/// An installed package and the index it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub index: Option<String>,
}

/// Registered indexes and installed packages of one rootfs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDb {
  /// Index name to URL.
  #[serde(default)]
  pub indexes: BTreeMap<String, String>,
  #[serde(default)]
  pub packages: BTreeMap<String, InstalledPackage>,
}

impl PackageDb {
  pub fn path(rootfs: &Path) -> PathBuf {
    // A looping link fails on open with ELOOP, which is reported as a database error.
    join_rooted(rootfs, PACKAGE_DB_PATH).unwrap_or_else(|| rootfs.join(PACKAGE_DB_PATH))
  }

  /// Load the database of `rootfs`. A missing file is an empty database.
  pub fn load(rootfs: &Path) -> Result<Self, PackageError> {
    let path = Self::path(rootfs);
    if !path.exists() {
      return Ok(Self::default());
    }

    let db_err = |message: String| PackageError::Database {
      path: path.clone(),
      message,
    };
    let content = fs::read_to_string(&path).map_err(|e| db_err(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| db_err(e.to_string()))
  }

  pub fn save(&self, rootfs: &Path) -> Result<(), PackageError> {
    let path = Self::path(rootfs);
    let db_err = |message: String| PackageError::Database {
      path: path.clone(),
      message,
    };

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| db_err(e.to_string()))?;
    }
    let content = serde_json::to_string_pretty(self).map_err(|e| db_err(e.to_string()))?;
    unlink_symlink(&path).map_err(|e| db_err(e.to_string()))?;
    fs::write(&path, content).map_err(|e| db_err(e.to_string()))
  }

  pub fn has_index(&self, name: &str) -> bool {
    self.indexes.contains_key(name)
  }

  pub fn is_installed(&self, package: &str) -> bool {
    self.packages.contains_key(package)
  }

  /// Record an index. Returns false when it was already registered with `url`.
  pub fn register(&mut self, name: &str, url: &str) -> bool {
    if self.indexes.get(name).is_some_and(|u| u == url) {
      return false;
    }
    self.indexes.insert(name.to_string(), url.to_string());
    true
  }

  pub fn record_install(&mut self, package: &str, index: Option<&str>) {
    self.packages.insert(
      package.to_string(),
      InstalledPackage {
        index: index.map(str::to_string),
      },
    );
  }

  /// Packages from `requested` that are not installed yet, in request order.
  pub fn missing<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    requested
      .iter()
      .map(String::as_str)
      .filter(|p| !self.is_installed(p) && seen.insert(*p))
      .collect()
  }

  /// Installed package names, sorted.
  pub fn package_names(&self) -> Vec<String> {
    self.packages.keys().cloned().collect()
  }
}

/// Record resources the base image already provides.
///
/// Existing entries are left alone.
pub fn seed_database(rootfs: &Path, preinstalled: &[Resource]) -> Result<(), PackageError> {
  if preinstalled.is_empty() {
    return Ok(());
  }

  let mut db = PackageDb::load(rootfs)?;
  for resource in preinstalled {
    match resource {
      Resource::Index(name) if !db.has_index(name) => {
        db.register(name, PREINSTALLED);
      }
      Resource::Package(name) if !db.is_installed(name) => db.record_install(name, None),
      _ => {}
    }
  }
  db.save(rootfs)
}

/// Backend for `register_index` and `install` steps.
///
/// Implementations must be idempotent: registering a registered index or
/// installing installed packages changes nothing.
#[allow(async_fn_in_trait)]
pub trait PackageManager {
  /// Make index `name` at `url` available to later installs.
  async fn register_index(&mut self, env: &ActionEnv<'_>, name: &str, url: &str) -> Result<String, ExecuteError>;

  /// Install `packages` as one batch. If any package fails, none is recorded.
  async fn install(
    &mut self,
    env: &ActionEnv<'_>,
    index: Option<&str>,
    packages: &[String],
  ) -> Result<String, ExecuteError>;
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
  vars
    .iter()
    .fold(template.to_string(), |acc, (key, value)| acc.replace(&format!("{{{}}}", key), value))
}

/// Delegates to shell command templates from the recipe's `[packages]` table.
#[derive(Debug, Clone, Default)]
pub struct ShellPackageManager {
  register: Option<String>,
  install: Option<String>,
}

impl ShellPackageManager {
  pub fn new(register: Option<String>, install: Option<String>) -> Self {
    Self { register, install }
  }
}

impl PackageManager for ShellPackageManager {
  async fn register_index(&mut self, env: &ActionEnv<'_>, name: &str, url: &str) -> Result<String, ExecuteError> {
    let mut db = PackageDb::load(env.rootfs)?;
    if !db.register(name, url) {
      debug!(index = %name, "index already registered");
      return Ok(format!("index {} already registered", name));
    }

    if let Some(template) = &self.register {
      let cmd = render(template, &[("name", name), ("url", url)]);
      env.run(&cmd, None, None).await.map_err(|e| match e {
        err @ ExecuteError::CmdFailed { .. } => PackageError::RegisterFailed {
          name: name.to_string(),
          message: err.to_string(),
        }
        .into(),
        other => other,
      })?;
    }

    db.save(env.rootfs)?;
    info!(index = %name, url = %url, "registered package index");
    Ok(format!("registered index {}", name))
  }

  async fn install(
    &mut self,
    env: &ActionEnv<'_>,
    index: Option<&str>,
    packages: &[String],
  ) -> Result<String, ExecuteError> {
    let mut db = PackageDb::load(env.rootfs)?;
    if let Some(index) = index
      && !db.has_index(index)
    {
      return Err(
        PackageError::UnregisteredIndex {
          index: index.to_string(),
        }
        .into(),
      );
    }

    let missing = db.missing(packages);
    if missing.is_empty() {
      debug!(packages = ?packages, "packages already installed");
      return Ok("nothing to install".to_string());
    }
    let batch = missing.join(" ");

    let mut output = String::new();
    if let Some(template) = &self.install {
      let cmd = render(template, &[("packages", batch.as_str()), ("index", index.unwrap_or_default())]);
      output = env
        .run(&cmd, None, None)
        .await
        .map_err(|e| match e {
          err @ ExecuteError::CmdFailed { .. } => PackageError::InstallFailed {
            packages: batch.clone(),
            message: err.to_string(),
          }
          .into(),
          other => other,
        })?
        .output;
    }

    for package in &missing {
      db.record_install(package, index);
    }
    db.save(env.rootfs)?;

    info!(packages = %batch, index = ?index, "installed packages");
    if output.is_empty() {
      output = format!("installed {}", batch);
    }
    Ok(output)
  }
}

/// Installs packages from local package directories.
///
/// An index is a directory (given as `file://` URL or absolute path) holding
/// one directory per package:
///
/// ```text
/// <index>/<package>/files/...   tree copied into the rootfs
/// <index>/<package>/depends     required packages, one per line
/// <index>/<package>/conflicts   packages that must not be installed
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryPackageManager;

fn index_dir(url: &str) -> Option<PathBuf> {
  let path = url.strip_prefix("file://").unwrap_or(url);
  path.starts_with('/').then(|| PathBuf::from(path))
}

fn read_list(path: &Path) -> Vec<String> {
  fs::read_to_string(path)
    .map(|content| {
      content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default()
}

impl DirectoryPackageManager {
  fn locate(db: &PackageDb, index: Option<&str>, package: &str) -> Result<(PathBuf, String), PackageError> {
    let candidates: Vec<(&String, &String)> = match index {
      Some(index) => db.indexes.iter().filter(|(name, _)| name.as_str() == index).collect(),
      None => db.indexes.iter().collect(),
    };

    candidates
      .into_iter()
      .filter_map(|(name, url)| index_dir(url).map(|dir| (dir.join(package), name.clone())))
      .find(|(dir, _)| dir.is_dir())
      .ok_or_else(|| PackageError::NotFound {
        package: package.to_string(),
        index: match index {
          Some(index) => format!("index '{}'", index),
          None => "any registered index".to_string(),
        },
      })
  }
}

impl PackageManager for DirectoryPackageManager {
  async fn register_index(&mut self, env: &ActionEnv<'_>, name: &str, url: &str) -> Result<String, ExecuteError> {
    let dir = index_dir(url).ok_or_else(|| PackageError::RegisterFailed {
      name: name.to_string(),
      message: format!("'{}' is not a file:// URL or absolute path", url),
    })?;
    if !dir.is_dir() {
      return Err(
        PackageError::RegisterFailed {
          name: name.to_string(),
          message: format!("{} is not a directory", dir.display()),
        }
        .into(),
      );
    }

    let mut db = PackageDb::load(env.rootfs)?;
    if db.register(name, url) {
      db.save(env.rootfs)?;
      info!(index = %name, path = ?dir, "registered package directory");
    }
    Ok(format!("registered index {}", name))
  }

  async fn install(
    &mut self,
    env: &ActionEnv<'_>,
    index: Option<&str>,
    packages: &[String],
  ) -> Result<String, ExecuteError> {
    let mut db = PackageDb::load(env.rootfs)?;
    if let Some(index) = index
      && !db.has_index(index)
    {
      return Err(
        PackageError::UnregisteredIndex {
          index: index.to_string(),
        }
        .into(),
      );
    }

    let missing = db.missing(packages);
    if missing.is_empty() {
      return Ok("nothing to install".to_string());
    }

    // Resolve and check the whole batch before touching the rootfs.
    let mut resolved = Vec::with_capacity(missing.len());
    for package in &missing {
      let (dir, found_in) = Self::locate(&db, index, package)?;

      for dep in read_list(&dir.join("depends")) {
        if !db.is_installed(&dep) && !missing.contains(&dep.as_str()) {
          return Err(
            PackageError::DependencyConflict {
              package: package.to_string(),
              reason: format!("depends on '{}', which is not installed", dep),
            }
            .into(),
          );
        }
      }
      for conflict in read_list(&dir.join("conflicts")) {
        if db.is_installed(&conflict) || missing.contains(&conflict.as_str()) {
          return Err(
            PackageError::DependencyConflict {
              package: package.to_string(),
              reason: format!("conflicts with '{}'", conflict),
            }
            .into(),
          );
        }
      }

      resolved.push((*package, dir, found_in));
    }

    for (package, dir, found_in) in &resolved {
      let files = dir.join("files");
      let written = if files.is_dir() { copy_tree(&files, env.rootfs)? } else { 0 };
      db.record_install(package, Some(found_in.as_str()));
      debug!(package = %package, index = %found_in, written, "installed package files");
    }
    db.save(env.rootfs)?;

    let batch = missing.join(" ");
    info!(packages = %batch, "installed packages");
    Ok(format!("installed {}", batch))
  }
}

/// The manager selected by a recipe's `[packages]` settings.
#[derive(Debug, Clone)]
pub enum AnyPackageManager {
  Shell(ShellPackageManager),
  Directory(DirectoryPackageManager),
}

impl AnyPackageManager {
  pub fn from_settings(settings: &PackageSettings) -> Self {
    match settings.manager {
      ManagerKind::Shell => Self::Shell(ShellPackageManager::new(
        settings.register.clone(),
        settings.install.clone(),
      )),
      ManagerKind::Directory => Self::Directory(DirectoryPackageManager),
    }
  }
}

impl PackageManager for AnyPackageManager {
  async fn register_index(&mut self, env: &ActionEnv<'_>, name: &str, url: &str) -> Result<String, ExecuteError> {
    match self {
      Self::Shell(m) => m.register_index(env, name, url).await,
      Self::Directory(m) => m.register_index(env, name, url).await,
    }
  }

  async fn install(
    &mut self,
    env: &ActionEnv<'_>,
    index: Option<&str>,
    packages: &[String],
  ) -> Result<String, ExecuteError> {
    match self {
      Self::Shell(m) => m.install(env, index, packages).await,
      Self::Directory(m) => m.install(env, index, packages).await,
    }
  }
}
