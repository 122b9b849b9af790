//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Barrier-certificate synthesis for polynomial dynamical systems.\n\n\
    Typical use:\n  \
    1. palisade synthesize job.json        (one degree)\n  \
    2. palisade sweep request.json         (even degrees up to max_degree)\n\n\
    Results are printed as JSON on stdout. Set RUST_LOG to change log verbosity.";

#[derive(Parser)]
#[command(name = "palisade")]
#[command(about = "Barrier-certificate synthesis via sum-of-squares programming")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Backend overrides shared by the solving subcommands.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct SolverArgs {
    /// CSDP executable (overrides PALISADE_CSDP)
    #[arg(long)]
    pub(crate) csdp: Option<String>,

    /// Keep every SDPA problem and solution file in this directory
    #[arg(long)]
    pub(crate) keep_files: Option<PathBuf>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Attempt a certificate at a single degree
    #[command(display_order = 10)]
    Synthesize {
        /// Path to the job JSON (mode, degree, params)
        file: PathBuf,

        #[command(flatten)]
        solver: SolverArgs,
    },

    /// Search even degrees 2..=max_degree in parallel
    #[command(display_order = 20)]
    Sweep {
        /// Path to the sweep request JSON (mode, max_degree, params)
        file: PathBuf,

        /// Number of concurrent attempts (overrides PALISADE_WORKERS)
        #[arg(long)]
        workers: Option<usize>,

        /// Run attempts on pool threads instead of worker processes
        #[arg(long, default_value_t = false)]
        in_process: bool,

        #[command(flatten)]
        solver: SolverArgs,
    },

    /// Serve one attempt: request JSON on stdin, reply JSON on stdout
    #[command(hide = true)]
    Worker,
}
