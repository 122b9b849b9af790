//! Barrier synthesis for one fixed degree.
//!
//! One routine assembles every variant: barrier template, region multipliers,
//! the initial / unsafe / drift SOS conditions and the level-set inequality.
//! The variant supplies the drift expression and the level-set form.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use palisade_ir::{HyperRectangle, Polynomial, VarId};
use palisade_prob::MomentError;
use palisade_sos::backends::csdp::CsdpSolver;
use palisade_sos::backends::sdpa::program_digest;
use palisade_sos::{LinExpr, ProgramError, SdpSolver, SosHandle, SosProgram};

use crate::params::{CertificateProblem, InputError, SynthesisJob};
use crate::pool::CancelToken;
use crate::result::{BarrierCertificate, FailureKind, SynthesisOutcome};
use crate::variant::{variant_for, DriftContext, LevelScalars};

/// Numeric knobs and backend configuration shared by every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Margin turning strict inequalities into `>= margin`.
    pub strict_margin: f64,
    /// Relative eigenvalue tolerance when reading SOS decompositions.
    pub sos_tolerance: f64,
    /// Barrier coefficients below this magnitude are dropped.
    pub prune_tolerance: f64,
    /// CSDP executable, looked up on `PATH` unless it contains a separator.
    pub csdp_command: String,
    /// Directory receiving every SDPA problem and solution file.
    pub keep_files: Option<PathBuf>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            strict_margin: 1e-6,
            sos_tolerance: 1e-6,
            prune_tolerance: 1e-9,
            csdp_command: "csdp".to_string(),
            keep_files: None,
        }
    }
}

impl SynthesisOptions {
    /// Defaults overridden by `PALISADE_CSDP` and `PALISADE_KEEP_SDPA`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(cmd) = std::env::var("PALISADE_CSDP") {
            if !cmd.trim().is_empty() {
                options.csdp_command = cmd;
            }
        }
        if let Ok(dir) = std::env::var("PALISADE_KEEP_SDPA") {
            if !dir.trim().is_empty() {
                options.keep_files = Some(PathBuf::from(dir));
            }
        }
        options
    }

    fn csdp(&self, cancel: &CancelToken) -> CsdpSolver {
        let solver = CsdpSolver::with_command(&self.csdp_command).abort_on(cancel.flag());
        match &self.keep_files {
            Some(dir) => solver.keep_files_in(dir),
            None => solver,
        }
    }
}

/// Which SDP backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverChoice {
    Csdp,
}

impl SolverChoice {
    /// Case-insensitive lookup; `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csdp" => Some(SolverChoice::Csdp),
            _ => None,
        }
    }
}

/// Reasons an attempt produced no certificate.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Invalid parameter: {0}")]
    Parameter(String),
    #[error("Noise model error: {0}")]
    Moment(#[from] MomentError),
    #[error("SOS program error: {0}")]
    Program(#[from] ProgramError),
    #[error("Unknown solver `{0}` (available: csdp)")]
    UnknownSolver(String),
    #[error("Solver {solver} failed: {message}")]
    Solver { solver: String, message: String },
    #[error("Solver {solver} panicked: {message}")]
    SolverPanic { solver: String, message: String },
    #[error("Degenerate barrier: the solved barrier is constant")]
    DegenerateBarrier,
    #[error("Non-SOS result: `{0}` has no sum-of-squares decomposition")]
    NotSos(String),
    #[error("Ordering violation: {}", describe_ordering(.gamma, .lambda, .c))]
    Ordering {
        gamma: f64,
        lambda: f64,
        c: Option<f64>,
    },
    #[error("Degenerate denominator: lambda = {lambda}")]
    DegenerateDenominator { lambda: f64 },
}

fn describe_ordering(gamma: &f64, lambda: &f64, c: &Option<f64>) -> String {
    match c {
        Some(c) => format!(
            "expected lambda > gamma > 0 and c > 0, got gamma = {gamma}, lambda = {lambda}, c = {c}"
        ),
        None => format!("expected lambda > gamma > 0, got gamma = {gamma}, lambda = {lambda}"),
    }
}

impl SynthesisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SynthesisError::Parameter(_) => FailureKind::ParameterDomainError,
            SynthesisError::Moment(e) => match e {
                MomentError::UnsupportedNoiseType(_) => FailureKind::UnsupportedNoiseType,
                MomentError::DimensionMismatch { .. } => FailureKind::DimensionMismatch,
                _ => FailureKind::ParameterDomainError,
            },
            SynthesisError::Program(_)
            | SynthesisError::UnknownSolver(_)
            | SynthesisError::Solver { .. }
            | SynthesisError::SolverPanic { .. } => FailureKind::SolverInvocationFailure,
            SynthesisError::DegenerateBarrier
            | SynthesisError::NotSos(_)
            | SynthesisError::Ordering { .. } => FailureKind::DegenerateCertificate,
            SynthesisError::DegenerateDenominator { .. } => FailureKind::DegenerateDenominator,
        }
    }
}

/// Synthesize with the backend named in the parameters.
///
/// Shape errors in the job are returned as `Err`; every other problem is
/// reported as a failure outcome carrying the attempted degree.
pub fn synthesize(
    job: &SynthesisJob,
    options: &SynthesisOptions,
) -> Result<SynthesisOutcome, InputError> {
    synthesize_cancellable(job, options, &CancelToken::new())
}

/// [`synthesize`], killing a running backend process once `cancel` is set.
/// The attempt then ends as a `SolverInvocationFailure`.
pub fn synthesize_cancellable(
    job: &SynthesisJob,
    options: &SynthesisOptions,
    cancel: &CancelToken,
) -> Result<SynthesisOutcome, InputError> {
    let problem = CertificateProblem::from_job(job)?;
    let result = match SolverChoice::from_name(&problem.solver) {
        Some(SolverChoice::Csdp) => attempt(&problem, &mut options.csdp(cancel), options),
        None => Err(SynthesisError::UnknownSolver(problem.solver.clone())),
    };
    Ok(into_outcome(result, &problem))
}

/// Synthesize with an explicit backend, ignoring the solver name in the
/// parameters.
pub fn synthesize_with<S: SdpSolver>(
    job: &SynthesisJob,
    solver: &mut S,
    options: &SynthesisOptions,
) -> Result<SynthesisOutcome, InputError> {
    let problem = CertificateProblem::from_job(job)?;
    let result = attempt(&problem, solver, options);
    Ok(into_outcome(result, &problem))
}

fn into_outcome(
    result: Result<BarrierCertificate, SynthesisError>,
    problem: &CertificateProblem,
) -> SynthesisOutcome {
    match result {
        Ok(cert) => {
            info!(
                mode = %problem.mode,
                degree = problem.degree,
                confidence = ?cert.confidence,
                "Barrier found: {}",
                cert.barrier_expr
            );
            SynthesisOutcome::Success(cert)
        }
        Err(e) => {
            info!(mode = %problem.mode, degree = problem.degree, kind = %e.kind(), "No barrier: {e}");
            SynthesisOutcome::failure(e.kind(), e.to_string(), problem.degree)
        }
    }
}

/// Check numeric parameter domains.
fn check_domains(problem: &CertificateProblem) -> Result<(), SynthesisError> {
    let bad = |name: &str, value: f64, rule: &str| {
        Err(SynthesisError::Parameter(format!(
            "{name} = {value} (must be {rule})"
        )))
    };
    if let Some(g) = problem.gamma {
        if !g.is_finite() || g < 0.0 {
            return bad("gamma", g, "finite and >= 0");
        }
    }
    if let Some(l) = problem.lambda {
        if !l.is_finite() || l <= 0.0 {
            return bad("lambda", l, "finite and > 0");
        }
    }
    if let Some(s) = &problem.stochastic {
        if !s.time_horizon.is_finite() || s.time_horizon < 0.0 {
            return bad("time_horizon", s.time_horizon, "finite and >= 0");
        }
        if let Some(phi) = s.confidence {
            if !(0.0..=1.0).contains(&phi) {
                return bad("confidence", phi, "in [0, 1]");
            }
        }
        if let Some(c) = s.c {
            if !c.is_finite() || c < 0.0 {
                return bad("c", c, "finite and >= 0");
            }
        }
    }
    Ok(())
}

/// `Σ L_i·g_i` over the box polynomials of `region`, with fresh SOS
/// multipliers `L_i`.
fn multiplier_sum(
    program: &mut SosProgram,
    label: &str,
    region: &HyperRectangle,
    vars: &[VarId],
    degree: u32,
) -> Result<(Polynomial<LinExpr>, Vec<SosHandle>), ProgramError> {
    let mut sum = Polynomial::zero();
    let mut handles = Vec::new();
    for (i, g) in region.polynomials(vars).iter().enumerate() {
        let multiplier = program.sos_polynomial(&format!("{label}.multiplier[{i}]"), vars, degree)?;
        sum = sum + multiplier.polynomial() * g;
        handles.push(multiplier);
    }
    Ok((sum, handles))
}

fn attempt<S: SdpSolver>(
    problem: &CertificateProblem,
    solver: &mut S,
    options: &SynthesisOptions,
) -> Result<BarrierCertificate, SynthesisError> {
    info!(
        mode = %problem.mode,
        solver = solver.name(),
        "Synthesizing barrier of degree {}...",
        problem.degree
    );
    check_domains(problem)?;
    let variant = variant_for(problem)?;
    let margin = options.strict_margin;
    let vars = problem.state.as_slice();
    let stochastic = problem.stochastic.as_ref();

    let mut program = SosProgram::new();
    let barrier = program.sos_polynomial("barrier", vars, problem.degree)?;
    let b = barrier.polynomial();

    // The ratio (gamma + cT)/lambda is scale invariant when every scalar is
    // free, so lambda can be pinned to one.
    let optimize = stochastic.is_some_and(|s| s.optimize);
    let all_free = problem.gamma.is_none()
        && problem.lambda.is_none()
        && stochastic.is_some_and(|s| s.c.is_none());
    let normalize_lambda = optimize && all_free;

    let gamma = match problem.gamma {
        Some(g) => LinExpr::constant(g),
        None => program.positive_scalar(margin),
    };
    let lambda = match problem.lambda {
        Some(l) => LinExpr::constant(l),
        None if normalize_lambda => LinExpr::constant(1.0),
        None => program.positive_scalar(margin),
    };
    let c = stochastic.map(|s| match s.c {
        Some(c) => LinExpr::constant(c),
        None => program.positive_scalar(margin),
    });
    let horizon = stochastic.map_or(0.0, |s| s.time_horizon);

    let level = variant.level_set(&LevelScalars {
        gamma: &gamma,
        lambda: &lambda,
        c: c.as_ref(),
        horizon,
        confidence: stochastic.and_then(|s| s.confidence),
    });
    if level.is_constant() {
        if level.constant_part() <= 0.0 {
            return Err(SynthesisError::Parameter(format!(
                "the fixed level-set scalars violate the level-set inequality ({} <= 0)",
                level.constant_part()
            )));
        }
    } else {
        program.require_positive("level_set", level, margin)?;
    }

    let (initial_sum, _) = multiplier_sum(
        &mut program,
        "initial",
        &problem.initial,
        vars,
        problem.multiplier_degree,
    )?;
    let initial_expr = -b.clone() - initial_sum + Polynomial::constant(gamma.clone());
    let initial = program.constrain_sos("initial", &initial_expr, vars)?;

    let mut unsafe_handles = Vec::with_capacity(problem.unsafe_regions.len());
    for (j, region) in problem.unsafe_regions.iter().enumerate() {
        let label = format!("unsafe[{j}]");
        let (sum, _) =
            multiplier_sum(&mut program, &label, region, vars, problem.multiplier_degree)?;
        let expr = b.clone() - sum - Polynomial::constant(lambda.clone());
        unsafe_handles.push(program.constrain_sos(&label, &expr, vars)?);
    }

    let drift_expr = variant.drift(&DriftContext {
        barrier: b,
        state: vars,
        dynamics: &problem.dynamics,
        c: c.as_ref(),
    })?;
    let (space_sum, _) = multiplier_sum(
        &mut program,
        "space",
        &problem.space,
        vars,
        problem.multiplier_degree,
    )?;
    let drift = program.constrain_sos("drift", &(drift_expr - space_sum), vars)?;

    if optimize {
        let tail = match &c {
            Some(c) => &gamma + &(c * horizon),
            None => gamma.clone(),
        };
        match problem.lambda {
            _ if normalize_lambda => program.minimize(tail),
            Some(l) => program.minimize(tail * (1.0 / l)),
            None => warn!(
                "lambda is free but gamma or c is fixed; the confidence ratio is not linear, solving for feasibility only"
            ),
        }
    }

    let sdp = program.to_sdp();
    let digest = program_digest(&sdp);
    debug!(
        variables = program.variable_count(),
        equalities = program.equality_count(),
        gram_blocks = program.gram_block_count(),
        digest = %digest,
        "assembled SOS program"
    );

    let solver_name = solver.name().to_string();
    let solution = match panic::catch_unwind(AssertUnwindSafe(|| solver.solve(&sdp))) {
        Ok(Ok(solution)) => solution,
        Ok(Err(e)) => {
            return Err(SynthesisError::Solver {
                solver: solver_name,
                message: e.to_string(),
            })
        }
        Err(payload) => {
            return Err(SynthesisError::SolverPanic {
                solver: solver_name,
                message: panic_message(payload.as_ref()),
            })
        }
    };
    debug!(status = %solution.status.describe(), "solver returned");
    let solved = program.solved(&solution)?;
    if let Some((label, residual)) = solved.worst_equality() {
        debug!(label, residual, "largest equality residual");
    }

    let realized = solved.realize(b).pruned(options.prune_tolerance);
    if realized.is_constant() {
        return Err(SynthesisError::DegenerateBarrier);
    }

    let conditions = std::iter::once(&barrier)
        .chain(std::iter::once(&initial))
        .chain(unsafe_handles.iter())
        .chain(std::iter::once(&drift));
    for handle in conditions {
        if solved.decomposition(handle, options.sos_tolerance).is_empty() {
            return Err(SynthesisError::NotSos(handle.label().to_string()));
        }
    }

    let gamma_v = solved.eval(&gamma);
    let lambda_v = solved.eval(&lambda);
    let c_v = c.as_ref().map(|c| solved.eval(c));
    let ordered = lambda_v > gamma_v && gamma_v > 0.0 && c_v.map_or(true, |c| c > 0.0);
    if !ordered {
        return Err(SynthesisError::Ordering {
            gamma: gamma_v,
            lambda: lambda_v,
            c: c_v,
        });
    }

    let confidence = match c_v {
        Some(c) => {
            let value = 1.0 - (gamma_v + c * horizon) / lambda_v;
            if lambda_v == 0.0 || !value.is_finite() {
                return Err(SynthesisError::DegenerateDenominator { lambda: lambda_v });
            }
            Some(value)
        }
        None => None,
    };

    Ok(BarrierCertificate {
        mode: problem.mode,
        degree: problem.degree,
        barrier_expr: realized.display(&problem.vars).to_string(),
        barrier: realized,
        gamma: gamma_v,
        lambda: lambda_v,
        c: c_v,
        confidence,
        program_digest: digest,
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
