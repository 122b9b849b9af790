// Shared helpers for the command handlers: reading JSON records from disk,
// printing them, and folding CLI overrides into the engine options.

use std::fs;
use std::path::Path;

use miette::{IntoDiagnostic, WrapErr};
use serde::de::DeserializeOwned;
use serde::Serialize;

use palisade_engine::SynthesisOptions;

use crate::cli::SolverArgs;

/// Exit status for a completed run that produced no certificate.
pub(crate) const EXIT_NO_CERTIFICATE: i32 = 2;

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> miette::Result<T> {
    let raw = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("malformed record in {}", path.display()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

pub(crate) fn synthesis_options(args: &SolverArgs) -> SynthesisOptions {
    let mut options = SynthesisOptions::from_env();
    apply_solver_args(&mut options, args);
    options
}

pub(crate) fn apply_solver_args(options: &mut SynthesisOptions, args: &SolverArgs) {
    if let Some(csdp) = &args.csdp {
        options.csdp_command = csdp.clone();
    }
    if let Some(dir) = &args.keep_files {
        options.keep_files = Some(dir.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn solver_args_override_options() {
        let mut options = SynthesisOptions::default();
        apply_solver_args(
            &mut options,
            &SolverArgs {
                csdp: Some("/opt/csdp/bin/csdp".into()),
                keep_files: Some(PathBuf::from("dumps")),
            },
        );
        assert_eq!(options.csdp_command, "/opt/csdp/bin/csdp");
        assert_eq!(options.keep_files, Some(PathBuf::from("dumps")));
    }

    #[test]
    fn empty_solver_args_keep_defaults() {
        let mut options = SynthesisOptions::default();
        apply_solver_args(&mut options, &SolverArgs::default());
        assert_eq!(options, SynthesisOptions::default());
    }

    #[test]
    fn missing_file_is_a_diagnostic() {
        let err = read_json::<serde_json::Value>(Path::new("/nonexistent/job.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
