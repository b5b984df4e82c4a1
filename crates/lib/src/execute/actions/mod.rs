//! Action execution module.
//!
//! Actions are the primitive mutations applied to a stage rootfs: running a
//! command, installing a download and copying from another stage.

pub mod cmd;
pub mod copy;
pub mod fetch;

use std::collections::BTreeMap;
use std::path::Path;

use crate::execute::types::{ActionResult, ExecuteError};
use crate::util::fs::resolve_rooted;

pub use cmd::execute_cmd;
pub use copy::copy_artifact;
pub use fetch::{execute_fetch, install_fetched};

/// Where actions for one stage run.
#[derive(Debug, Clone, Copy)]
pub struct ActionEnv<'a> {
  /// The stage filesystem being mutated.
  pub rootfs: &'a Path,
  /// Scratch directory exposed as `TMPDIR` (outside the rootfs).
  pub tmp_dir: &'a Path,
  /// Download cache for fetches.
  pub downloads_dir: &'a Path,
  /// Optional shell override for commands.
  pub shell: Option<&'a str>,
}

impl ActionEnv<'_> {
  /// Run a command. `cwd` is an in-image path and defaults to the rootfs.
  pub async fn run(
    &self,
    cmd: &str,
    env: Option<&BTreeMap<String, String>>,
    cwd: Option<&str>,
  ) -> Result<ActionResult, ExecuteError> {
    let cwd = match cwd {
      Some(cwd) => Some(resolve_rooted(self.rootfs, cwd).ok_or_else(|| ExecuteError::PathEscape { path: cwd.to_string() })?),
      None => None,
    };

    let output = execute_cmd(cmd, env, cwd.as_deref(), self.rootfs, self.tmp_dir, self.shell).await?;
    Ok(ActionResult { output })
  }

  /// Download `url` to the in-image path `dest`.
  pub async fn fetch(
    &self,
    url: &str,
    sha256: Option<&str>,
    dest: &str,
    executable: bool,
  ) -> Result<ActionResult, ExecuteError> {
    let path = install_fetched(url, sha256, self.downloads_dir, self.rootfs, dest, executable).await?;
    Ok(ActionResult {
      output: path.to_string_lossy().to_string(),
    })
  }
}
