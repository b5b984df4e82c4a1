//! Implementation of the `stagehand plan` command.
//!
//! Resolves a recipe and validates its provisioning steps and environment
//! without touching the artifact store or network.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use stagehand_lib::pipeline;
use stagehand_lib::provision::Step;
use stagehand_lib::recipe::{EnvironmentDefaults, load_recipe};
use stagehand_lib::resolve::{BuildPlan, StageBase};

use crate::output::{print_info, print_json, print_section, print_stat, print_success, symbols, truncate_hash};

#[derive(Serialize)]
struct PlanReport<'a> {
  plan: &'a BuildPlan,
  provision: &'a [Step],
  environment: &'a EnvironmentDefaults,
}

pub fn cmd_plan(path: &Path, json: bool) -> Result<()> {
  let recipe = load_recipe(path).with_context(|| format!("Failed to load recipe: {}", path.display()))?;
  let plan = pipeline::plan(&recipe).map_err(|e| {
    let kind = e.kind();
    anyhow::Error::new(e).context(format!("Invalid recipe ({})", kind))
  })?;

  if json {
    return print_json(&PlanReport {
      plan: &plan,
      provision: &recipe.provision,
      environment: &recipe.environment,
    });
  }

  print_success(&format!("Plan for {} ({})", plan.name, truncate_hash(&plan.recipe_hash.0)));
  print_stat("Target", &plan.target);
  print_stat("Recipe hash", &plan.recipe_hash.0);
  print_stat("Stages", &plan.stages.len().to_string());
  print_stat("Provisioning steps", &recipe.provision.len().to_string());

  print_section("Stages:");
  for stage in &plan.stages {
    let base = match &stage.base {
      StageBase::Source(source) => format!("source {}", source.reference()),
      StageBase::Stage(base) => format!("from {}", base),
    };
    println!("  {} {} ({})", symbols::ARROW, stage.name, base);
    for copy in &stage.copies {
      println!("      {} {} -> {}", symbols::PLUS, copy.origin(), copy.dest);
    }
    for cmd in &stage.run {
      println!("      $ {}", cmd);
    }
  }

  print_section("Waves:");
  for (i, wave) in plan.waves.iter().enumerate() {
    println!("  {}: {}", i + 1, wave.join(", "));
  }

  if !recipe.provision.is_empty() {
    print_section("Provisioning:");
    for (i, step) in recipe.provision.iter().enumerate() {
      println!("  {}. {}", i + 1, step);
    }
  }

  if !plan.unused.is_empty() {
    println!();
    print_info(&format!("Not needed by {}: {}", plan.target, plan.unused.join(", ")));
  }

  Ok(())
}
