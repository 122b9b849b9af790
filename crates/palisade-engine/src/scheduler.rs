//! Degree search.
//!
//! A sweep tries every even barrier degree up to a maximum, one attempt per
//! degree on a [`WorkerPool`], and reduces the results with a
//! [`CompletionPolicy`] chosen by the system mode.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::params::{CertificateProblem, InputError, SynthesisJob, SynthesisParams, SystemMode};
use crate::pool::{AttemptError, AttemptRunner, PoolError, ProcessRunner, WorkerPool};
use crate::result::{BarrierCertificate, SweepOutcome, SynthesisFailure, SynthesisOutcome};
use crate::synthesis::SynthesisOptions;

/// Largest `max_degree` a sweep accepts.
pub const MAX_SWEEP_DEGREE: u32 = 64;

/// Even degrees `2, 4, ..` up to and including `max_degree`.
pub fn candidate_degrees(max_degree: u32) -> Vec<u32> {
    (2..=max_degree).step_by(2).collect()
}

/// How a sweep turns attempt results into one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Return the first success in completion order and cancel the rest.
    FirstSuccess,
    /// Wait for every attempt and keep the most confident success.
    HighestConfidence,
}

impl CompletionPolicy {
    pub fn for_mode(mode: SystemMode) -> Self {
        if mode.is_stochastic() {
            CompletionPolicy::HighestConfidence
        } else {
            CompletionPolicy::FirstSuccess
        }
    }
}

/// A sweep: every parameter but the degree, plus the degree ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRequest {
    pub mode: SystemMode,
    pub max_degree: u32,
    pub params: SynthesisParams,
}

impl SweepRequest {
    pub fn job(&self, degree: u32) -> SynthesisJob {
        SynthesisJob {
            mode: self.mode,
            degree,
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Pool size; defaults to the available parallelism.
    pub workers: Option<usize>,
    /// Executable started as `<exe> worker`; defaults to the current one.
    pub worker_exe: Option<PathBuf>,
    pub synthesis: SynthesisOptions,
}

impl SweepOptions {
    /// Defaults overridden by `PALISADE_WORKERS`, `PALISADE_WORKER_EXE` and
    /// the variables read by [`SynthesisOptions::from_env`].
    pub fn from_env() -> Self {
        let workers = std::env::var("PALISADE_WORKERS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0);
        let worker_exe = std::env::var_os("PALISADE_WORKER_EXE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            workers,
            worker_exe,
            synthesis: SynthesisOptions::from_env(),
        }
    }

    /// Number of threads for `candidates` attempts.
    pub fn pool_size(&self, candidates: usize) -> usize {
        let wanted = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        wanted.min(candidates).max(1)
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum SweepError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Input(#[from] InputError),
    #[error("Worker pool error: {0}")]
    #[diagnostic(code(palisade::sweep::pool))]
    Pool(#[from] PoolError),
}

/// Process-isolated runner using the configured worker executable.
pub fn default_runner(options: &SweepOptions) -> Result<Arc<dyn AttemptRunner>, SweepError> {
    let exe = match &options.worker_exe {
        Some(exe) => exe.clone(),
        None => std::env::current_exe().map_err(PoolError::WorkerExe)?,
    };
    Ok(Arc::new(ProcessRunner::new(exe, options.synthesis.clone())))
}

fn more_confident(candidate: &BarrierCertificate, best: Option<&BarrierCertificate>) -> bool {
    let Some(best) = best else {
        return true;
    };
    let score = |c: &BarrierCertificate| c.confidence.unwrap_or(f64::NEG_INFINITY);
    match score(candidate).total_cmp(&score(best)) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => candidate.degree < best.degree,
        std::cmp::Ordering::Less => false,
    }
}

/// Sweep the candidate degrees of `request`.
///
/// Parameter shapes are validated once before anything is dispatched; a
/// malformed request is returned as `Err` and no attempt runs. Attempts that
/// fail or crash are recorded in the outcome and never abort the sweep.
pub fn sweep(
    request: &SweepRequest,
    runner: Arc<dyn AttemptRunner>,
    options: &SweepOptions,
) -> Result<SweepOutcome, SweepError> {
    if request.max_degree > MAX_SWEEP_DEGREE {
        return Err(InputError::DegreeCeiling {
            max_degree: request.max_degree,
            limit: MAX_SWEEP_DEGREE,
        }
        .into());
    }
    let degrees = candidate_degrees(request.max_degree);
    let Some(&first) = degrees.first() else {
        info!(max_degree = request.max_degree, "No candidate degrees to try");
        return Ok(SweepOutcome::NoResult {
            attempted: degrees,
            failures: Vec::new(),
        });
    };
    CertificateProblem::from_job(&request.job(first))?;

    let policy = CompletionPolicy::for_mode(request.mode);
    let mut pool = WorkerPool::new(options.pool_size(degrees.len()), runner)?;
    info!(
        mode = %request.mode,
        ?degrees,
        workers = pool.size(),
        ?policy,
        "Sweeping barrier degrees..."
    );
    let mut handles = Vec::with_capacity(degrees.len());
    for &degree in &degrees {
        handles.push(pool.submit(request.job(degree))?);
    }

    let mut failures: Vec<SynthesisFailure> = Vec::new();
    let mut best: Option<BarrierCertificate> = None;
    for _ in 0..handles.len() {
        let Some(done) = pool.recv() else {
            warn!("worker pool stopped before every attempt reported");
            break;
        };
        match done.result {
            Ok(SynthesisOutcome::Success(cert)) => match policy {
                CompletionPolicy::FirstSuccess => {
                    info!(degree = cert.degree, "First barrier found; cancelling other attempts");
                    for handle in &handles {
                        handle.cancel();
                    }
                    failures.sort_by_key(|f| f.degree);
                    return Ok(SweepOutcome::Found {
                        certificate: cert,
                        failures,
                    });
                }
                CompletionPolicy::HighestConfidence => {
                    if more_confident(&cert, best.as_ref()) {
                        best = Some(cert);
                    }
                }
            },
            Ok(SynthesisOutcome::Failure(failure)) => failures.push(failure),
            Err(AttemptError::Cancelled) => {}
            Err(e) => {
                warn!(degree = done.degree, "attempt failed: {e}");
                failures.push(SynthesisFailure {
                    kind: e.kind(),
                    error: e.to_string(),
                    degree: done.degree,
                });
            }
        }
    }
    failures.sort_by_key(|f| f.degree);

    Ok(match best {
        Some(certificate) => {
            info!(
                degree = certificate.degree,
                confidence = ?certificate.confidence,
                "Selected most confident barrier"
            );
            SweepOutcome::Found {
                certificate,
                failures,
            }
        }
        None => {
            info!(attempted = ?degrees, "No barrier found at any degree");
            SweepOutcome::NoResult {
                attempted: degrees,
                failures,
            }
        }
    })
}
