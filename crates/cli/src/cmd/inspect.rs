//! Implementation of the `stagehand inspect` command.

use std::path::Path;

use anyhow::{Context, Result};

use stagehand_lib::image::Image;

use crate::output::{format_bytes, print_json, print_section, print_stat, print_success, symbols};

pub fn cmd_inspect(dir: &Path, json: bool) -> Result<()> {
  let image = Image::load(dir).with_context(|| format!("Failed to load image: {}", dir.display()))?;
  let config = image.config();

  if json {
    return print_json(config);
  }

  print_success(&format!("Image {} (target {})", config.name, config.target));
  print_stat("Recipe hash", &config.recipe_hash.0);
  print_stat("Digest", &config.digest.0);
  print_stat("Size", &format_bytes(dir_size(&image.rootfs())));
  print_stat("Search path", &config.path.join(":"));
  if let Some(workdir) = &config.workdir {
    print_stat("Workdir", workdir);
  }
  if config.cmd.is_empty() {
    print_stat("Default command", "(none)");
  } else {
    print_stat("Default command", &config.cmd.join(" "));
  }

  if !config.volumes.is_empty() {
    print_section("Volumes:");
    for volume in &config.volumes {
      println!("  {} {}", symbols::INFO, volume);
    }
  }

  if !config.env.is_empty() {
    print_section("Environment:");
    for (key, value) in &config.env {
      println!("  {}={}", key, value);
    }
  }

  if !config.packages.is_empty() {
    print_section("Packages:");
    for package in &config.packages {
      println!("  {} {}", symbols::INFO, package);
    }
  }

  print_section("Stages:");
  println!("  {}", config.stages.join(" -> "));

  Ok(())
}

fn dir_size(path: &Path) -> u64 {
  let mut size = 0;
  if let Ok(entries) = std::fs::read_dir(path) {
    for entry in entries.flatten() {
      let Ok(file_type) = entry.file_type() else {
        continue;
      };
      if file_type.is_file() {
        size += entry.metadata().map(|m| m.len()).unwrap_or(0);
      } else if file_type.is_dir() {
        size += dir_size(&entry.path());
      }
    }
  }
  size
}
