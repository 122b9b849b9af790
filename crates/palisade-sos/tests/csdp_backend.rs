//! End-to-end checks against a real CSDP executable.
//!
//! Gated behind `#[ignore]` so they can be skipped in CI when CSDP is not
//! installed. Run with `cargo test -- --ignored` to include them.

use palisade_ir::{Polynomial, VarId};
use palisade_sos::backends::csdp::CsdpSolver;
use palisade_sos::{LinExpr, SdpSolver, SdpStatus, SosProgram};

const X: VarId = VarId(0);

fn lifted(p: &Polynomial) -> Polynomial<LinExpr> {
    p.map_coefficients(|c| LinExpr::constant(*c))
}

#[test]
#[ignore]
fn csdp_certifies_a_perfect_square() {
    let target = (Polynomial::var(X) + Polynomial::constant(1.0)).pow(2);
    let mut program = SosProgram::new();
    let handle = program.constrain_sos("square", &lifted(&target), &[X]).unwrap();
    let sdp = program.to_sdp();

    let mut solver = CsdpSolver::new();
    let solution = solver.solve(&sdp).unwrap();
    assert!(solution.status.is_usable(), "{:?}", solution.status);
    let solved = program.solved(&solution).unwrap();
    assert!(!solved.decomposition(&handle, 1e-6).is_empty());
    assert!(sdp.max_residual(&solution.primal) < 1e-6);
}

#[test]
#[ignore]
fn csdp_rejects_a_negative_polynomial() {
    let target = Polynomial::constant(-1.0) - Polynomial::var(X).pow(2);
    let mut program = SosProgram::new();
    program.constrain_sos("negative", &lifted(&target), &[X]).unwrap();

    let mut solver = CsdpSolver::new();
    let solution = solver.solve(&program.to_sdp()).unwrap();
    assert!(!solution.status.is_usable());
    assert_ne!(solution.status, SdpStatus::Optimal);
}

#[test]
#[ignore]
fn csdp_minimizes_a_scalar() {
    // minimize t subject to t - 2 >= 0
    let mut program = SosProgram::new();
    let t = program.nonneg_scalar();
    program.require_positive("bound", t.clone(), 2.0).unwrap();
    program.minimize(t.clone());

    let mut solver = CsdpSolver::new();
    let solution = solver.solve(&program.to_sdp()).unwrap();
    let solved = program.solved(&solution).unwrap();
    assert!((solved.eval(&t) - 2.0).abs() < 1e-5);
}
