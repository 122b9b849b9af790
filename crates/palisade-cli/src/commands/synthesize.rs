use std::path::PathBuf;

use tracing::info;

use palisade_engine::{synthesize, SynthesisJob};

use super::helpers::{print_json, read_json, synthesis_options, EXIT_NO_CERTIFICATE};
use crate::cli::SolverArgs;

pub(crate) fn run_synthesize_command(file: PathBuf, solver: SolverArgs) -> miette::Result<()> {
    let job: SynthesisJob = read_json(&file)?;
    let options = synthesis_options(&solver);
    info!(file = %file.display(), mode = %job.mode, degree = job.degree, "synthesize");

    let outcome = synthesize(&job, &options)?;
    print_json(&outcome)?;

    if !outcome.is_success() {
        std::process::exit(EXIT_NO_CERTIFICATE);
    }
    Ok(())
}
