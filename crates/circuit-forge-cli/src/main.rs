//! circuit-forge CLI.
//!
//! `build` runs the artifact pipeline for one circuit, `serve` publishes
//! generated input scripts over HTTP, and `check` reports on the toolchain.

mod commands;
mod output;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use circuit_forge_core::config::{ForgeConfig, CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "circuit-forge",
    about = "Build and publish Circom circuit artifacts",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to circuit-forge.config.json
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Base output directory; sets both `<dir>/circuit` and `<dir>/code`
    #[arg(long, global = true, env = "GENERATED_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a circuit and generate its keys and input script
    Build {
        #[command(flatten)]
        target: BuildTarget,

        /// Delete and regenerate every artifact instead of reusing it
        #[arg(long)]
        force: bool,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve generated input scripts over HTTP
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        /// JSON file mapping entry ids to {slug, name}
        #[arg(long)]
        store: PathBuf,
    },

    /// Check that the compiler and key generator are installed
    Check,
}

#[derive(Args)]
pub struct BuildTarget {
    /// Circuit slug (output directory name)
    #[arg(long, requires = "name", conflicts_with = "entry")]
    slug: Option<String>,

    /// Circuit template name
    #[arg(long, requires = "slug", conflicts_with = "entry")]
    name: Option<String>,

    /// Entry id to resolve through --store
    #[arg(long, requires = "store")]
    entry: Option<String>,

    /// JSON file mapping entry ids to {slug, name}
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Tool output is forwarded at info level; keep it visible by default.
    let filter = match cli.verbose {
        0 => "warn,circuit_forge::process=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&cli.config, cli.output_dir.as_deref())?;

    match cli.command {
        Commands::Build {
            target,
            force,
            json,
        } => {
            commands::build::run(config, &target, force, json).await?;
        }
        Commands::Serve { addr, store } => {
            commands::serve::run(config, addr, &store).await?;
        }
        Commands::Check => {
            commands::check::run(&config).await?;
        }
    }

    Ok(())
}

/// The default config path is optional; an explicitly named one is not.
fn load_config(path: &Path, output_dir: Option<&Path>) -> anyhow::Result<ForgeConfig> {
    let config = if path == Path::new(CONFIG_FILE) {
        ForgeConfig::load_or_default(path)
    } else {
        ForgeConfig::load(path)
    }
    .with_context(|| format!("loading {}", path.display()))?;

    Ok(match output_dir {
        Some(dir) => config.with_output_dir(dir),
        None => config,
    })
}
