//! Implementation of the `stagehand run` command.
//!
//! The exit code mirrors the command's exit code.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use stagehand_lib::image::{Image, run_invocation};

use crate::output::print_warning;

pub fn cmd_run(dir: &Path, command: &[String]) -> Result<u8> {
  let image = Image::load(dir).with_context(|| format!("Failed to load image: {}", dir.display()))?;
  let invocation = image
    .invocation(command)
    .context("Nothing to run: pass a command after `--`")?;
  debug!(program = ?invocation.program, "invoking");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let status = rt
    .block_on(run_invocation(&invocation))
    .with_context(|| format!("Failed to run {}", invocation.argv.join(" ")))?;

  match status.code() {
    Some(code) => Ok(u8::try_from(code).unwrap_or(1)),
    None => {
      print_warning("Command was terminated by a signal");
      Ok(1)
    }
  }
}
