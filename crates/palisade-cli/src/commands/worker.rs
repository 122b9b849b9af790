use std::io;

use miette::IntoDiagnostic;

use palisade_engine::serve_worker;

/// One request line in, one reply line out. Logging stays on stderr.
///
/// Closing stdin before the reply aborts the running solver.
pub(crate) fn run_worker_command() -> miette::Result<()> {
    serve_worker(io::stdin(), io::stdout().lock()).into_diagnostic()
}
