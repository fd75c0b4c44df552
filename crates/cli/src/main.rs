mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use abiforge_lib::consts::{DEFAULT_HOST, DEFAULT_PORT_ENV};

use crate::cmd::{cmd_build, cmd_cache_list, cmd_cache_prune, cmd_launch, cmd_plan};
use crate::output::{OutputFormat, print_error};

/// abiforge - layer-cached image builds for ABI-sensitive packages
#[derive(Parser)]
#[command(name = "abiforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (overridden by RUST_LOG)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the ordered build steps and which are already cached
  Plan {
    /// Path to the manifest (TOML or JSON)
    #[arg(default_value = "abiforge.toml")]
    manifest: PathBuf,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Build the image, reusing cached layers
  Build {
    /// Path to the manifest (TOML or JSON)
    #[arg(default_value = "abiforge.toml")]
    manifest: PathBuf,

    /// Directory receiving rootfs/ and image.json
    #[arg(long, default_value = "image")]
    out: PathBuf,

    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Resolve the port from the environment and start the worker
  Launch {
    /// Environment variable holding the port
    #[arg(long, default_value = DEFAULT_PORT_ENV)]
    port_var: String,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Load variables from a dotenv file first
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Worker command; `{port}`, `{host}` and `{bind}` are substituted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true, num_args = 1..)]
    worker: Vec<String>,
  },

  /// Inspect or clean the layer store
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

#[derive(Subcommand)]
enum CacheCommand {
  /// List stored layers
  List {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Remove incomplete or corrupt layers and stale staging directories
  Prune {
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

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
    Commands::Plan { manifest, output } => cmd_plan(&manifest, output).map(|()| ExitCode::SUCCESS),
    Commands::Build { manifest, out, output } => cmd_build(&manifest, &out, output).map(|()| ExitCode::SUCCESS),
    Commands::Launch {
      port_var,
      host,
      env_file,
      worker,
    } => cmd_launch(port_var, host, env_file, worker),
    Commands::Cache { command } => match command {
      CacheCommand::List { output } => cmd_cache_list(output).map(|()| ExitCode::SUCCESS),
      CacheCommand::Prune { output } => cmd_cache_prune(output).map(|()| ExitCode::SUCCESS),
    },
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}
