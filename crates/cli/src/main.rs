mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, cmd_build, cmd_inspect, cmd_plan, cmd_run};
use output::print_error;

/// stagehand - assemble runtime images from pinned stages
#[derive(Parser)]
#[command(name = "stagehand", author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve a recipe and show the build plan without building anything
  Plan {
    /// Path to the recipe (.toml or .json)
    recipe: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
  },

  /// Build a recipe and publish the image
  Build(BuildArgs),

  /// Show the configuration of a published image
  Inspect {
    /// Image directory
    image: PathBuf,

    /// Print the configuration as JSON
    #[arg(long)]
    json: bool,
  },

  /// Run the image's default command, or the given one instead
  Run {
    /// Image directory
    image: PathBuf,

    /// Command overriding the default, e.g. `-- app migrate`
    #[arg(last = true)]
    command: Vec<String>,
  },
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Plan { recipe, json } => cmd_plan(&recipe, json).map(|_| 0),
    Commands::Build(args) => cmd_build(args).map(|_| 0),
    Commands::Inspect { image, json } => cmd_inspect(&image, json).map(|_| 0),
    Commands::Run { image, command } => cmd_run(&image, &command),
  };

  match result {
    Ok(code) => ExitCode::from(code),
    Err(err) => {
      print_error(&format!("{:#}", err));
      ExitCode::FAILURE
    }
  }
}
