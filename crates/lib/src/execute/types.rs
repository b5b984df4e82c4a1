//! Types for stage and provisioning execution.
//!
//! This module defines the error types, result types, and configuration
//! for realizing stages and running provisioning steps.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::platform::paths;
use crate::provision::PackageError;
use crate::util::hash::DigestError;

/// Coarse classification of a build failure, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Malformed or cyclic stage graph, unpinned source, bad step declaration.
  Configuration,
  /// A referenced path or pinned source is absent.
  MissingArtifact,
  /// Index registration or package installation failed.
  PackageInstall,
  /// A download failed or did not match its checksum.
  Network,
  /// Anything else that stops execution (command exit status, I/O).
  Execution,
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ErrorKind::Configuration => "configuration error",
      ErrorKind::MissingArtifact => "missing artifact",
      ErrorKind::PackageInstall => "package install error",
      ErrorKind::Network => "network error",
      ErrorKind::Execution => "execution error",
    };
    f.write_str(s)
  }
}

/// Errors that can occur while realizing stages or provisioning.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// HTTP request failed.
  #[error("fetch failed for {url}: {message}")]
  Network { url: String, message: String },

  /// SHA256 hash mismatch after download.
  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  /// Command execution failed.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  /// A copy referenced a path that the source stage does not contain.
  #[error("stage '{stage}' copies {path} from '{from}', but it does not exist there")]
  MissingArtifact { stage: String, from: String, path: String },

  /// A pinned image is absent from the artifact store.
  #[error("pinned source {reference} not found at {path}")]
  SourceNotFound { reference: String, path: PathBuf },

  /// A fetched binary could not be made executable.
  #[error("{path} is not executable after install")]
  NotExecutable { path: PathBuf },

  /// An in-image path climbs out of the rootfs.
  #[error("path escapes the stage rootfs: {path}")]
  PathEscape { path: String },

  /// Package index or install failure.
  #[error(transparent)]
  Package(#[from] PackageError),

  /// Directory digest failed.
  #[error("digest error: {0}")]
  Digest(#[from] DigestError),

  /// I/O error during execution.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A provisioning step failed; later steps did not run.
  #[error("provisioning step {index} ({step}) failed: {source}")]
  StepFailed {
    index: usize,
    step: String,
    #[source]
    source: Box<ExecuteError>,
  },

  /// A stage failed to build; later stages did not run.
  #[error("stage '{stage}' failed: {source}")]
  StageFailed {
    stage: String,
    #[source]
    source: Box<ExecuteError>,
  },
}

impl ExecuteError {
  /// Classify the error, looking through step and stage wrappers.
  pub fn kind(&self) -> ErrorKind {
    match self {
      ExecuteError::Network { .. } | ExecuteError::ChecksumMismatch { .. } => ErrorKind::Network,
      ExecuteError::MissingArtifact { .. } | ExecuteError::SourceNotFound { .. } => ErrorKind::MissingArtifact,
      ExecuteError::Package(_) => ErrorKind::PackageInstall,
      ExecuteError::StepFailed { source, .. } | ExecuteError::StageFailed { source, .. } => source.kind(),
      ExecuteError::PathEscape { .. } => ErrorKind::Configuration,
      ExecuteError::CmdFailed { .. }
      | ExecuteError::NotExecutable { .. }
      | ExecuteError::Digest(_)
      | ExecuteError::Io(_) => ErrorKind::Execution,
    }
  }

  /// Index of the failing provisioning step, if the failure came from one.
  pub fn failed_step(&self) -> Option<usize> {
    match self {
      ExecuteError::StepFailed { index, .. } => Some(*index),
      ExecuteError::StageFailed { source, .. } => source.failed_step(),
      _ => None,
    }
  }
}

/// Result of executing a single action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
  /// The output of the action (file path for fetches, stdout for commands).
  pub output: String,
}

/// Result of realizing a single stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutput {
  pub name: String,
  /// Where the stage's filesystem lives while the build runs.
  pub rootfs: PathBuf,
  /// Destination paths written by copies, in order.
  pub copied: Vec<String>,
  /// Results of the stage's commands.
  pub commands: Vec<ActionResult>,
}

/// Configuration for stage execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Shell to use for command execution.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,

  /// Artifact store with pinned images laid out as `<name>/<tag>/`.
  pub images_dir: PathBuf,

  /// Parent directory for per-build scratch space.
  pub work_dir: PathBuf,

  /// Keep the per-build scratch directory after the build ends.
  pub keep_work_dir: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      shell: None,
      images_dir: paths::images_dir(),
      work_dir: paths::work_dir(),
      keep_work_dir: false,
    }
  }
}
