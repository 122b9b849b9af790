#![doc = include_str!("../README.md")]

//! Palisade synthesis engine.
//!
//! This crate ties the workspace together: parameter validation, the four
//! certificate variants, single-degree synthesis, the worker pool and the
//! degree sweep.

pub mod params;
pub mod pool;
pub mod result;
pub mod scheduler;
pub mod synthesis;
pub mod variant;

pub use params::{
    CertificateProblem, InputError, NoiseSpec, StochasticParams, SynthesisJob, SynthesisParams,
    SystemMode,
};
pub use pool::{
    serve_worker, AttemptError, AttemptRunner, CancelToken, InProcessRunner, PoolError,
    ProcessRunner, SolverFactoryRunner, WorkerReply, WorkerRequest,
};
pub use result::{
    BarrierCertificate, FailureKind, SweepOutcome, SynthesisFailure, SynthesisOutcome,
};
pub use scheduler::{
    candidate_degrees, default_runner, sweep, CompletionPolicy, SweepError, SweepOptions,
    SweepRequest, MAX_SWEEP_DEGREE,
};
pub use synthesis::{
    synthesize, synthesize_cancellable, synthesize_with, SolverChoice, SynthesisError,
    SynthesisOptions,
};
