// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "frame-pipeline")]
#[command(about = "Run a GPU frame graph into a movie file")]
#[command(version = frame_pipeline::constants::app_info::version())]
struct Cli {
    /// Log at info level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a movie from a source through a filter chain
    Record(cli::RecordArgs),

    /// List available video and audio encoders
    Encoders,

    /// List bundled GPU programs
    Programs,

    /// Run the graph on the headless context and print counters
    DryRun(cli::DryRunArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=frame_pipeline=debug
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Record(args) => cli::record(config, args),
        Commands::Encoders => cli::list_encoders(),
        Commands::Programs => cli::list_programs(),
        Commands::DryRun(args) => cli::dry_run(args),
    }
}
