#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::DMatrix;
use thiserror::Error;

use palisade_engine::{
    AttemptError, AttemptRunner, BarrierCertificate, CancelToken, FailureKind, NoiseSpec,
    StochasticParams, SweepRequest, SynthesisJob, SynthesisOutcome, SynthesisParams, SystemMode,
};
use palisade_ir::Polynomial;
use palisade_sos::{SdpProblem, SdpSolution, SdpSolver, SdpStatus};

/// 1-D system `x' = 0.5 x` on `[-6, 6]`, initial `[-0.5, 0.5]`, unsafe
/// `[-6, -5]`.
pub fn scalar_params() -> SynthesisParams {
    SynthesisParams {
        dim: 1,
        initial_lower: vec![-0.5],
        initial_upper: vec![0.5],
        unsafe_lower: vec![vec![-6.0]],
        unsafe_upper: vec![vec![-5.0]],
        space_lower: vec![-6.0],
        space_upper: vec![6.0],
        state_vars: vec!["x1".into()],
        dynamics: vec!["0.5*x1".into()],
        multiplier_degree: None,
        solver: "csdp".into(),
        gamma: None,
        lambda: None,
        stochastic: None,
    }
}

/// Scalar system with additive normal noise `x' = 0.5 x + ς`.
pub fn discrete_noise_params() -> SynthesisParams {
    SynthesisParams {
        dynamics: vec!["0.5*x1 + varsigma1".into()],
        stochastic: Some(StochasticParams {
            time_horizon: 1.0,
            confidence: None,
            c: None,
            optimize: false,
            noise: NoiseSpec::Discrete {
                noise_vars: vec!["varsigma1".into()],
                noise_type: "normal".into(),
                sigma: Some(vec![0.1]),
                rate: None,
                a: None,
                b: None,
            },
        }),
        ..scalar_params()
    }
}

/// Scalar jump-diffusion `dx = -x dt + 0.1 dW` with jumps `x -> x + 0.2`.
pub fn jump_diffusion_params() -> SynthesisParams {
    SynthesisParams {
        dynamics: vec!["-x1".into()],
        stochastic: Some(StochasticParams {
            time_horizon: 1.0,
            confidence: None,
            c: None,
            optimize: false,
            noise: NoiseSpec::JumpDiffusion {
                diffusion: vec!["0.1".into()],
                jump_reset: vec![0.2],
                jump_rate: vec![0.5],
            },
        }),
        ..scalar_params()
    }
}

/// Fix gamma, lambda and (when stochastic) c so that every level-set
/// inequality is decided before solving.
pub fn with_fixed_scalars(mut params: SynthesisParams, gamma: f64, lambda: f64, c: f64) -> SynthesisParams {
    params.gamma = Some(gamma);
    params.lambda = Some(lambda);
    if let Some(s) = params.stochastic.as_mut() {
        s.c = Some(c);
    }
    params
}

pub fn job(mode: SystemMode, degree: u32, params: SynthesisParams) -> SynthesisJob {
    SynthesisJob {
        mode,
        degree,
        params,
    }
}

pub fn sweep_request(mode: SystemMode, max_degree: u32, params: SynthesisParams) -> SweepRequest {
    SweepRequest {
        mode,
        max_degree,
        params,
    }
}

/// What a [`ScriptedSolver`] answers.
#[derive(Debug, Clone)]
pub enum Script {
    /// Optimal, every block the identity.
    Identity,
    /// Optimal, every block zero.
    Zeros,
    /// The given status without a primal solution.
    Status(SdpStatus),
    /// Optimal with exactly these blocks.
    Primal(Vec<DMatrix<f64>>),
    /// A backend error.
    Error(String),
    Panic,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ScriptedError(pub String);

/// Solver stand-in that ignores the constraints and answers from a script.
#[derive(Debug)]
pub struct ScriptedSolver {
    script: Script,
    pub calls: usize,
    pub last_problem: Option<SdpProblem>,
}

impl ScriptedSolver {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: 0,
            last_problem: None,
        }
    }
}

impl SdpSolver for ScriptedSolver {
    type Error = ScriptedError;

    fn name(&self) -> &str {
        "scripted"
    }

    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, ScriptedError> {
        self.calls += 1;
        self.last_problem = Some(problem.clone());
        let blocks = |fill: f64| -> Vec<DMatrix<f64>> {
            problem
                .blocks
                .iter()
                .map(|b| DMatrix::identity(b.size(), b.size()) * fill)
                .collect()
        };
        match &self.script {
            Script::Identity => Ok(SdpSolution {
                status: SdpStatus::Optimal,
                primal: blocks(1.0),
            }),
            Script::Zeros => Ok(SdpSolution {
                status: SdpStatus::Optimal,
                primal: blocks(0.0),
            }),
            Script::Primal(primal) => Ok(SdpSolution {
                status: SdpStatus::Optimal,
                primal: primal.clone(),
            }),
            Script::Status(status) => Ok(SdpSolution::without_primal(status.clone())),
            Script::Error(message) => Err(ScriptedError(message.clone())),
            Script::Panic => panic!("scripted solver panic"),
        }
    }
}

/// Behaviour of one degree under a [`StubRunner`].
#[derive(Debug, Clone)]
pub enum Stub {
    Succeed { confidence: Option<f64>, delay_ms: u64 },
    Fail { kind: FailureKind, delay_ms: u64 },
    /// Worker process died.
    Crash,
    Panic,
    /// Run until cancelled, giving up after ten seconds.
    Slow,
}

pub fn certificate(mode: SystemMode, degree: u32, confidence: Option<f64>) -> BarrierCertificate {
    BarrierCertificate {
        mode,
        degree,
        barrier: Polynomial::constant(1.0),
        barrier_expr: format!("stub of degree {degree}"),
        gamma: 0.1,
        lambda: 1.0,
        c: confidence.map(|_| 0.01),
        confidence,
        program_digest: format!("{degree:064}"),
    }
}

/// Attempt runner answering per degree from a fixed plan.
#[derive(Debug, Default)]
pub struct StubRunner {
    plan: HashMap<u32, Stub>,
    pub calls: Mutex<Vec<u32>>,
    pub cancelled: Mutex<Vec<u32>>,
}

impl StubRunner {
    pub fn new(plan: impl IntoIterator<Item = (u32, Stub)>) -> Self {
        Self {
            plan: plan.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<u32> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort_unstable();
        calls
    }

    /// Wait until `n` attempts have observed cancellation.
    pub fn wait_for_cancelled(&self, n: usize, timeout: Duration) -> Vec<u32> {
        let start = Instant::now();
        loop {
            let mut seen = self.cancelled.lock().unwrap().clone();
            if seen.len() >= n || start.elapsed() > timeout {
                seen.sort_unstable();
                return seen;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl AttemptRunner for StubRunner {
    fn run(
        &self,
        job: &SynthesisJob,
        cancel: &CancelToken,
    ) -> Result<SynthesisOutcome, AttemptError> {
        self.calls.lock().unwrap().push(job.degree);
        let stub = self.plan.get(&job.degree).cloned().unwrap_or(Stub::Fail {
            kind: FailureKind::SolverInvocationFailure,
            delay_ms: 0,
        });
        match stub {
            Stub::Succeed {
                confidence,
                delay_ms,
            } => {
                thread::sleep(Duration::from_millis(delay_ms));
                Ok(SynthesisOutcome::Success(certificate(
                    job.mode,
                    job.degree,
                    confidence,
                )))
            }
            Stub::Fail { kind, delay_ms } => {
                thread::sleep(Duration::from_millis(delay_ms));
                Ok(SynthesisOutcome::failure(kind, "stub failure", job.degree))
            }
            Stub::Crash => Err(AttemptError::WorkerExit {
                status: "signal: 9 (SIGKILL)".into(),
                stderr: "killed".into(),
            }),
            Stub::Panic => panic!("stub runner panic at degree {}", job.degree),
            Stub::Slow => {
                let start = Instant::now();
                while start.elapsed() < Duration::from_secs(10) {
                    if cancel.is_cancelled() {
                        self.cancelled.lock().unwrap().push(job.degree);
                        return Err(AttemptError::Cancelled);
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(SynthesisOutcome::failure(
                    FailureKind::SolverInvocationFailure,
                    "never cancelled",
                    job.degree,
                ))
            }
        }
    }
}
