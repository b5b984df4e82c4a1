//! Copy action implementation.
//!
//! Pulls a path out of an already realized stage into the stage being built.
//! Source contents are opaque until the source stage has run, so a missing
//! path is only detected here.

use std::path::Path;

use tracing::debug;

use crate::execute::types::ExecuteError;
use crate::util::fs::{copy_path, join_rooted, resolve_rooted};

/// Copy `src` from `from_rootfs` (stage `from`) to `dest` inside `rootfs`.
///
/// Returns the number of filesystem entries written.
pub fn copy_artifact(
  stage: &str,
  from: &str,
  from_rootfs: &Path,
  src: &str,
  rootfs: &Path,
  dest: &str,
) -> Result<u64, ExecuteError> {
  let source = join_rooted(from_rootfs, src).ok_or_else(|| ExecuteError::PathEscape { path: src.to_string() })?;

  let Ok(meta) = std::fs::symlink_metadata(&source) else {
    return Err(ExecuteError::MissingArtifact {
      stage: stage.to_string(),
      from: from.to_string(),
      path: src.to_string(),
    });
  };

  // Directories merge into whatever `dest` points at; files replace it.
  let target = if meta.is_dir() {
    resolve_rooted(rootfs, dest)
  } else {
    join_rooted(rootfs, dest)
  }
  .ok_or_else(|| ExecuteError::PathEscape { path: dest.to_string() })?;

  let written = copy_path(&source, &target)?;
  debug!(stage = %stage, from = %from, src = %src, dest = %dest, written, "copied artifact");
  Ok(written)
}
