//! Implementation of the `stagehand build` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use stagehand_lib::execute::ExecuteConfig;
use stagehand_lib::pipeline::{BuildOptions, build_file};

use crate::output::{format_duration, print_json, print_stat, print_success, truncate_hash};

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Path to the recipe (.toml or .json)
  pub recipe: PathBuf,

  /// Directory to publish the image to
  #[arg(short, long)]
  pub output: PathBuf,

  /// Artifact store holding pinned images (default: $STAGEHAND_IMAGES_DIR or the data directory)
  #[arg(long)]
  pub images_dir: Option<PathBuf>,

  /// Scratch directory for stage trees (default: $STAGEHAND_WORK_DIR or the cache directory)
  #[arg(long)]
  pub work_dir: Option<PathBuf>,

  /// Keep the scratch directory after the build
  #[arg(long)]
  pub keep_work_dir: bool,

  /// Shell used for stage and provisioning commands
  #[arg(long)]
  pub shell: Option<String>,

  /// Print the build summary as JSON
  #[arg(long)]
  pub json: bool,
}

/// Build the recipe and publish the image.
///
/// Prints a summary including the image location, digest and counts of
/// realized stages and provisioning steps.
pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let mut execute = ExecuteConfig::default();
  if let Some(images_dir) = args.images_dir {
    execute.images_dir = images_dir;
  }
  if let Some(work_dir) = args.work_dir {
    execute.work_dir = work_dir;
  }
  execute.keep_work_dir = args.keep_work_dir;
  if args.shell.is_some() {
    execute.shell = args.shell;
  }

  let options = BuildOptions {
    execute,
    output: args.output,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(build_file(&args.recipe, &options)).map_err(|e| {
    let kind = e.kind();
    anyhow::Error::new(e).context(format!("Build failed ({})", kind))
  })?;

  let image_dir = dunce::canonicalize(outcome.image.dir()).unwrap_or_else(|_| outcome.image.dir().to_path_buf());
  let config = outcome.image.config();

  if args.json {
    return print_json(&serde_json::json!({
      "image": image_dir,
      "config": config,
      "stages": outcome.stages.iter().map(|s| &s.name).collect::<Vec<_>>(),
      "provision": outcome.provision,
      "states": outcome.states,
      "duration_ms": outcome.duration.as_millis() as u64,
    }));
  }

  print_success(&format!("Built {} in {}", config.name, format_duration(outcome.duration)));
  print_stat("Image", &image_dir.display().to_string());
  print_stat("Digest", truncate_hash(&config.digest.0));
  print_stat("Stages realized", &outcome.stages.len().to_string());
  print_stat("Steps run", &outcome.provision.steps.len().to_string());
  if !outcome.provision.removed.is_empty() {
    print_stat("Cleaned up", &outcome.provision.removed.join(", "));
  }
  if !config.cmd.is_empty() {
    print_stat("Default command", &config.cmd.join(" "));
  }

  Ok(())
}
