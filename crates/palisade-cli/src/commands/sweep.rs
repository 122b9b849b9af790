use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use palisade_engine::{
    default_runner, sweep, AttemptRunner, InProcessRunner, SweepOptions, SweepRequest,
};

use super::helpers::{apply_solver_args, print_json, read_json, EXIT_NO_CERTIFICATE};
use crate::cli::SolverArgs;

pub(crate) fn run_sweep_command(
    file: PathBuf,
    workers: Option<usize>,
    in_process: bool,
    solver: SolverArgs,
) -> miette::Result<()> {
    let request: SweepRequest = read_json(&file)?;

    let mut options = SweepOptions::from_env();
    if workers.is_some() {
        options.workers = workers.filter(|&n| n > 0);
    }
    apply_solver_args(&mut options.synthesis, &solver);

    let runner: Arc<dyn AttemptRunner> = if in_process {
        Arc::new(InProcessRunner::new(options.synthesis.clone()))
    } else {
        default_runner(&options)?
    };
    info!(
        file = %file.display(),
        mode = %request.mode,
        max_degree = request.max_degree,
        in_process,
        "sweep"
    );

    let outcome = sweep(&request, runner, &options)?;
    print_json(&outcome)?;

    if outcome.certificate().is_none() {
        std::process::exit(EXIT_NO_CERTIFICATE);
    }
    Ok(())
}
