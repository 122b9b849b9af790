//! `palisade` binary entry point.

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synthesize { file, solver } => {
            commands::synthesize::run_synthesize_command(file, solver)?;
        }
        Commands::Sweep {
            file,
            workers,
            in_process,
            solver,
        } => {
            commands::sweep::run_sweep_command(file, workers, in_process, solver)?;
        }
        Commands::Worker => {
            commands::worker::run_worker_command()?;
        }
    }

    Ok(())
}
