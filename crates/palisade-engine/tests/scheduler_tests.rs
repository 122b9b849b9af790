mod common;
use common::*;

use std::sync::Arc;
use std::time::Duration;

use palisade_engine::{
    sweep, AttemptRunner, FailureKind, InProcessRunner, InputError, SolverFactoryRunner,
    SweepError, SweepOptions, SweepOutcome, SynthesisJob, SynthesisOptions, SystemMode,
    MAX_SWEEP_DEGREE,
};

fn options(workers: usize) -> SweepOptions {
    SweepOptions {
        workers: Some(workers),
        ..SweepOptions::default()
    }
}

fn succeed(confidence: f64) -> Stub {
    Stub::Succeed {
        confidence: Some(confidence),
        delay_ms: 0,
    }
}

#[test]
fn scenario_b_even_degrees_up_to_six() {
    let runner = Arc::new(StubRunner::new([(2, succeed(0.1)), (4, succeed(0.2)), (6, succeed(0.3))]));
    let request = sweep_request(SystemMode::DiscreteStochastic, 6, discrete_noise_params());
    let outcome = sweep(&request, runner.clone(), &options(3)).unwrap();
    assert_eq!(runner.calls(), vec![2, 4, 6]);
    assert_eq!(outcome.certificate().unwrap().degree, 6);
}

#[test]
fn scenario_c_odd_maximum_is_excluded() {
    let runner = Arc::new(StubRunner::default());
    let request = sweep_request(SystemMode::DiscreteStochastic, 5, discrete_noise_params());
    let outcome = sweep(&request, runner.clone(), &options(2)).unwrap();
    assert_eq!(runner.calls(), vec![2, 4]);
    match outcome {
        SweepOutcome::NoResult {
            attempted,
            failures,
        } => {
            assert_eq!(attempted, vec![2, 4]);
            assert_eq!(failures.len(), 2);
        }
        other => panic!("expected no result, got {other:?}"),
    }
}

#[test]
fn scenario_d_most_confident_record_wins() {
    let runner = Arc::new(StubRunner::new([(2, succeed(0.6)), (4, succeed(0.8))]));
    let request = sweep_request(SystemMode::ContinuousStochastic, 4, jump_diffusion_params());
    let outcome = sweep(&request, runner, &options(2)).unwrap();
    let cert = outcome.certificate().expect("a certificate");
    assert_eq!(cert.degree, 4);
    assert_eq!(cert.confidence, Some(0.8));
}

#[test]
fn stochastic_sweep_waits_for_slow_better_attempts() {
    let runner = Arc::new(StubRunner::new([
        (2, succeed(0.6)),
        (
            4,
            Stub::Succeed {
                confidence: Some(0.9),
                delay_ms: 100,
            },
        ),
    ]));
    let request = sweep_request(SystemMode::DiscreteStochastic, 4, discrete_noise_params());
    let outcome = sweep(&request, runner, &options(2)).unwrap();
    assert_eq!(outcome.certificate().unwrap().degree, 4);
}

#[test]
fn equal_confidence_prefers_the_lower_degree() {
    let runner = Arc::new(StubRunner::new([(2, succeed(0.5)), (4, succeed(0.5)), (6, succeed(0.5))]));
    let request = sweep_request(SystemMode::DiscreteStochastic, 6, discrete_noise_params());
    let outcome = sweep(&request, runner, &options(3)).unwrap();
    assert_eq!(outcome.certificate().unwrap().degree, 2);
}

#[test]
fn deterministic_sweep_returns_first_finisher_and_cancels_the_rest() {
    let runner = Arc::new(StubRunner::new([
        (2, Stub::Slow),
        (
            4,
            Stub::Succeed {
                confidence: None,
                delay_ms: 20,
            },
        ),
        (6, Stub::Slow),
    ]));
    let request = sweep_request(SystemMode::DiscreteDeterministic, 6, scalar_params());
    let outcome = sweep(&request, runner.clone(), &options(3)).unwrap();
    let cert = outcome.certificate().expect("degree 4 finishes first");
    assert_eq!(cert.degree, 4);
    assert_eq!(cert.confidence, None);
    // the sweep does not wait for the others, but they must see the cancel
    assert_eq!(runner.wait_for_cancelled(2, Duration::from_secs(5)), vec![2, 6]);
}

#[test]
fn queued_attempts_are_skipped_after_a_deterministic_win() {
    let runner = Arc::new(StubRunner::new([
        (
            2,
            Stub::Succeed {
                confidence: None,
                delay_ms: 0,
            },
        ),
        (4, Stub::Slow),
        (6, Stub::Slow),
    ]));
    let request = sweep_request(SystemMode::ContinuousDeterministic, 6, scalar_params());
    let outcome = sweep(&request, runner.clone(), &options(1)).unwrap();
    assert_eq!(outcome.certificate().unwrap().degree, 2);
    // degree 4 may be picked up before the cancel lands, but it stops at
    // the cancel and degree 6 is then skipped without running
    runner.wait_for_cancelled(1, Duration::from_millis(200));
    std::thread::sleep(Duration::from_millis(50));
    assert!(!runner.calls().contains(&6), "{:?}", runner.calls());
}

#[test]
fn crashed_and_panicking_attempts_are_isolated() {
    let runner = Arc::new(StubRunner::new([(2, Stub::Panic), (4, succeed(0.7)), (6, Stub::Crash)]));
    let request = sweep_request(SystemMode::DiscreteStochastic, 6, discrete_noise_params());
    let outcome = sweep(&request, runner, &options(3)).unwrap();
    assert_eq!(outcome.certificate().unwrap().degree, 4);
    let failures = outcome.failures();
    assert_eq!(failures.iter().map(|f| f.degree).collect::<Vec<_>>(), vec![2, 6]);
    assert!(failures
        .iter()
        .all(|f| f.kind == FailureKind::SolverInvocationFailure));
    assert!(failures[0].error.contains("panicked"), "{}", failures[0].error);
}

#[test]
fn deterministic_sweep_without_success_reports_every_failure() {
    let runner = Arc::new(StubRunner::new([
        (
            2,
            Stub::Fail {
                kind: FailureKind::DegenerateCertificate,
                delay_ms: 0,
            },
        ),
        (4, Stub::Crash),
    ]));
    let request = sweep_request(SystemMode::DiscreteDeterministic, 4, scalar_params());
    match sweep(&request, runner, &options(2)).unwrap() {
        SweepOutcome::NoResult {
            attempted,
            failures,
        } => {
            assert_eq!(attempted, vec![2, 4]);
            assert_eq!(failures[0].kind, FailureKind::DegenerateCertificate);
            assert_eq!(failures[1].kind, FailureKind::SolverInvocationFailure);
        }
        other => panic!("expected no result, got {other:?}"),
    }
}

#[test]
fn malformed_requests_fail_before_dispatch() {
    let mut params = scalar_params();
    params.unsafe_upper.clear();
    let runner = Arc::new(StubRunner::new([(2, succeed(0.5))]));
    let request = sweep_request(SystemMode::DiscreteDeterministic, 4, params);
    let err = sweep(&request, runner.clone(), &options(2)).unwrap_err();
    assert!(matches!(
        err,
        SweepError::Input(InputError::RegionMismatch { .. })
    ));
    assert!(runner.calls().is_empty());
}

#[test]
fn maximum_above_the_ceiling_is_rejected() {
    let runner = Arc::new(StubRunner::new([(2, succeed(0.5))]));
    for max_degree in [MAX_SWEEP_DEGREE + 1, u32::MAX] {
        let request = sweep_request(SystemMode::DiscreteStochastic, max_degree, discrete_noise_params());
        let err = sweep(&request, runner.clone(), &options(2)).unwrap_err();
        assert!(
            matches!(err, SweepError::Input(InputError::DegreeCeiling { limit: MAX_SWEEP_DEGREE, .. })),
            "{err:?}"
        );
        assert_eq!(
            InputError::DegreeCeiling { max_degree, limit: MAX_SWEEP_DEGREE }.kind(),
            FailureKind::ParameterDomainError
        );
    }
    assert!(runner.calls().is_empty());

    let request = sweep_request(SystemMode::DiscreteStochastic, MAX_SWEEP_DEGREE, discrete_noise_params());
    let outcome = sweep(&request, runner.clone(), &options(2)).unwrap();
    assert_eq!(outcome.certificate().map(|c| c.degree), Some(2));
}

#[test]
fn maximum_below_two_attempts_nothing() {
    let runner = Arc::new(StubRunner::default());
    let request = sweep_request(SystemMode::DiscreteDeterministic, 1, scalar_params());
    let outcome = sweep(&request, runner.clone(), &options(2)).unwrap();
    assert_eq!(
        outcome,
        SweepOutcome::NoResult {
            attempted: vec![],
            failures: vec![],
        }
    );
    assert!(runner.calls().is_empty());
}

#[test]
fn in_process_sweep_with_unknown_solver_reports_failures() {
    let mut params = scalar_params();
    params.solver = "no-such-backend".into();
    let request = sweep_request(SystemMode::DiscreteDeterministic, 4, params);
    let runner: Arc<dyn AttemptRunner> = Arc::new(InProcessRunner::new(SynthesisOptions::default()));
    let outcome = sweep(&request, runner, &options(2)).unwrap();
    assert!(outcome.certificate().is_none());
    assert_eq!(outcome.failures().len(), 2);
    assert!(outcome
        .failures()
        .iter()
        .all(|f| f.kind == FailureKind::SolverInvocationFailure));
}

#[test]
fn scripted_backend_sweep_finds_a_certificate() {
    let params = with_fixed_scalars(discrete_noise_params(), 1.0, 5.0, 0.1);
    let request = sweep_request(SystemMode::DiscreteStochastic, 4, params);
    let runner = Arc::new(SolverFactoryRunner::new(
        |_job: &SynthesisJob| ScriptedSolver::new(Script::Identity),
        SynthesisOptions::default(),
    ));
    let outcome = sweep(&request, runner, &options(2)).unwrap();
    let cert = outcome.certificate().expect("identity answers certify");
    // both degrees reach the same confidence; the lower one is kept
    assert_eq!(cert.degree, 2);
    assert!((cert.confidence.unwrap() - 0.78).abs() < 1e-12);
    assert!(outcome.failures().is_empty());
}
