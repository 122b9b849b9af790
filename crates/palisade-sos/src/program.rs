//! Attempt-scoped SOS program builder.
//!
//! Decision variables come in two flavours: non-negative scalars, which live
//! together in one diagonal block, and Gram entries `Q[i][j]` (`i <= j`) of a
//! PSD block. Every equality is an affine expression required to vanish.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use thiserror::Error;
use tracing::debug;

use palisade_ir::{monomials_up_to, Monomial, Polynomial, VarId};

use crate::decomposition::SosDecomposition;
use crate::linear::{DecisionVar, LinExpr};
use crate::sdp::{BlockKind, SdpConstraint, SdpEntry, SdpProblem, SdpSolution};

/// Constant residual below which a variable-free equality counts as met.
pub const DEFAULT_EQUALITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProgramError {
    #[error("SOS polynomial `{label}` needs an even degree, got {degree}")]
    OddDegree { label: String, degree: u32 },
    #[error("Constraint `{label}` cannot hold: coefficient of {monomial} is fixed at {residual}")]
    TriviallyInfeasible {
        label: String,
        monomial: String,
        residual: f64,
    },
    #[error("Solver produced no primal solution ({status})")]
    NoPrimal { status: String },
    #[error("Solution block {block} has size {found}, expected {expected}")]
    SolutionShape {
        block: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Nonneg(usize),
    Gram { block: usize, row: usize, col: usize },
}

/// A Gram-backed SOS polynomial or SOS constraint registered in a program.
#[derive(Debug, Clone)]
pub struct SosHandle {
    label: String,
    block: usize,
    basis: Vec<Monomial>,
    polynomial: Polynomial<LinExpr>,
}

impl SosHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Index of the PSD block holding this handle's Gram matrix.
    pub fn block(&self) -> usize {
        self.block
    }

    pub fn basis(&self) -> &[Monomial] {
        &self.basis
    }

    /// The template polynomial (for `sos_polynomial`) or the constrained
    /// expression (for `constrain_sos`).
    pub fn polynomial(&self) -> &Polynomial<LinExpr> {
        &self.polynomial
    }
}

#[derive(Debug, Clone)]
struct Equality {
    label: String,
    expr: LinExpr,
}

/// SOS program under construction. One instance per synthesis attempt.
#[derive(Debug, Clone)]
pub struct SosProgram {
    slots: Vec<Slot>,
    gram_sizes: Vec<usize>,
    gram_vars: Vec<Vec<DecisionVar>>,
    nonneg_count: usize,
    equalities: Vec<Equality>,
    objective: LinExpr,
    tolerance: f64,
}

impl Default for SosProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl SosProgram {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_EQUALITY_TOLERANCE)
    }

    /// `tolerance` bounds the constant residual accepted on equalities that
    /// no decision variable can influence.
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            slots: Vec::new(),
            gram_sizes: Vec::new(),
            gram_vars: Vec::new(),
            nonneg_count: 0,
            equalities: Vec::new(),
            objective: LinExpr::default(),
            tolerance,
        }
    }

    pub fn variable_count(&self) -> usize {
        self.slots.len()
    }

    pub fn equality_count(&self) -> usize {
        self.equalities.len()
    }

    pub fn gram_block_count(&self) -> usize {
        self.gram_sizes.len()
    }

    /// Fresh scalar `s >= 0`.
    pub fn nonneg_scalar(&mut self) -> LinExpr {
        let v = DecisionVar(self.slots.len());
        self.slots.push(Slot::Nonneg(self.nonneg_count));
        self.nonneg_count += 1;
        LinExpr::var(v)
    }

    /// Fresh scalar held at least `margin` above zero, expressed as
    /// `margin + s` with `s >= 0`.
    pub fn positive_scalar(&mut self, margin: f64) -> LinExpr {
        self.nonneg_scalar() + LinExpr::constant(margin)
    }

    /// Record `expr == rhs`.
    pub fn require_equal(
        &mut self,
        label: &str,
        expr: LinExpr,
        rhs: f64,
    ) -> Result<(), ProgramError> {
        let expr = expr - LinExpr::constant(rhs);
        self.push_equality(label, None, expr)
    }

    /// Record `expr >= margin` through a fresh slack: `expr - s == margin`.
    pub fn require_positive(
        &mut self,
        label: &str,
        expr: LinExpr,
        margin: f64,
    ) -> Result<(), ProgramError> {
        let slack = self.nonneg_scalar();
        self.require_equal(label, expr - slack, margin)
    }

    /// Replace the objective. Programs without one are pure feasibility
    /// problems.
    pub fn minimize(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    /// New SOS polynomial of even `degree` over `vars`, parameterised as
    /// `zᵀQz` with `z` every monomial of degree at most `degree / 2`.
    pub fn sos_polynomial(
        &mut self,
        label: &str,
        vars: &[VarId],
        degree: u32,
    ) -> Result<SosHandle, ProgramError> {
        if degree % 2 == 1 {
            return Err(ProgramError::OddDegree {
                label: label.to_string(),
                degree,
            });
        }
        let basis = monomials_up_to(vars, degree / 2);
        let block = self.new_gram_block(basis.len());
        let polynomial = self.gram_polynomial(block, &basis);
        debug!(label, block, basis = basis.len(), "declared SOS polynomial");
        Ok(SosHandle {
            label: label.to_string(),
            block,
            basis,
            polynomial,
        })
    }

    /// Require `poly` to be a sum of squares in `vars` by equating its
    /// coefficients with those of a fresh Gram form.
    pub fn constrain_sos(
        &mut self,
        label: &str,
        poly: &Polynomial<LinExpr>,
        vars: &[VarId],
    ) -> Result<SosHandle, ProgramError> {
        let half = poly.degree().div_ceil(2);
        let basis = monomials_up_to(vars, half);
        let block = self.new_gram_block(basis.len());
        let gram = self.gram_polynomial(block, &basis);
        let diff = poly - &gram;
        for (monomial, expr) in diff.terms() {
            self.push_equality(label, Some(monomial), expr.clone())?;
        }
        debug!(label, block, basis = basis.len(), "constrained SOS");
        Ok(SosHandle {
            label: label.to_string(),
            block,
            basis,
            polynomial: poly.clone(),
        })
    }

    /// Lower the program to a standard-form SDP. Gram blocks come first in
    /// declaration order, followed by the diagonal block of scalars if any.
    pub fn to_sdp(&self) -> SdpProblem {
        let mut blocks: Vec<BlockKind> =
            self.gram_sizes.iter().map(|&n| BlockKind::Psd(n)).collect();
        if self.nonneg_count > 0 {
            blocks.push(BlockKind::Diagonal(self.nonneg_count));
        }
        let constraints = self
            .equalities
            .iter()
            .map(|eq| SdpConstraint {
                entries: self.entries(&eq.expr),
                rhs: -eq.expr.constant_part(),
            })
            .collect();
        SdpProblem {
            blocks,
            constraints,
            objective: self.entries(&self.objective),
        }
    }

    /// Pair the program with a solver result for read-back.
    pub fn solved<'a>(
        &'a self,
        solution: &'a SdpSolution,
    ) -> Result<SolvedProgram<'a>, ProgramError> {
        if !solution.status.is_usable() {
            return Err(ProgramError::NoPrimal {
                status: solution.status.describe(),
            });
        }
        let mut expected: Vec<usize> = self.gram_sizes.clone();
        if self.nonneg_count > 0 {
            expected.push(self.nonneg_count);
        }
        if solution.primal.len() != expected.len() {
            return Err(ProgramError::SolutionShape {
                block: solution.primal.len().min(expected.len()),
                expected: expected.len(),
                found: solution.primal.len(),
            });
        }
        for (block, (m, &n)) in solution.primal.iter().zip(&expected).enumerate() {
            if m.nrows() != n || m.ncols() != n {
                return Err(ProgramError::SolutionShape {
                    block,
                    expected: n,
                    found: m.nrows(),
                });
            }
        }
        Ok(SolvedProgram {
            program: self,
            primal: &solution.primal,
        })
    }

    fn new_gram_block(&mut self, n: usize) -> usize {
        let block = self.gram_sizes.len();
        let mut vars = Vec::with_capacity(n * (n + 1) / 2);
        for row in 0..n {
            for col in row..n {
                vars.push(DecisionVar(self.slots.len()));
                self.slots.push(Slot::Gram { block, row, col });
            }
        }
        self.gram_sizes.push(n);
        self.gram_vars.push(vars);
        block
    }

    fn gram_var(&self, block: usize, row: usize, col: usize) -> DecisionVar {
        let (r, c) = if row <= col { (row, col) } else { (col, row) };
        let n = self.gram_sizes[block];
        // packed upper triangle, row-major
        let index = r * n - r * r.saturating_sub(1) / 2 + (c - r);
        self.gram_vars[block][index]
    }

    fn gram_polynomial(&self, block: usize, basis: &[Monomial]) -> Polynomial<LinExpr> {
        let mut poly = Polynomial::zero();
        for (i, zi) in basis.iter().enumerate() {
            for (j, zj) in basis.iter().enumerate().skip(i) {
                let factor = if i == j { 1.0 } else { 2.0 };
                poly.add_term(zi.times(zj), LinExpr::term(self.gram_var(block, i, j), factor));
            }
        }
        poly
    }

    fn push_equality(
        &mut self,
        label: &str,
        monomial: Option<&Monomial>,
        expr: LinExpr,
    ) -> Result<(), ProgramError> {
        if expr.is_constant() {
            let residual = expr.constant_part();
            if residual.abs() > self.tolerance {
                return Err(ProgramError::TriviallyInfeasible {
                    label: label.to_string(),
                    monomial: monomial
                        .map(|m| format!("{:?}", m.powers()))
                        .unwrap_or_else(|| "the scalar equality".to_string()),
                    residual,
                });
            }
            return Ok(());
        }
        self.equalities.push(Equality {
            label: label.to_string(),
            expr,
        });
        Ok(())
    }

    fn lp_block(&self) -> usize {
        self.gram_sizes.len()
    }

    fn entries(&self, expr: &LinExpr) -> Vec<SdpEntry> {
        let mut merged: BTreeMap<(usize, usize, usize), f64> = BTreeMap::new();
        for (v, coef) in expr.terms() {
            let (key, value) = match self.slots[v.0] {
                Slot::Nonneg(i) => ((self.lp_block(), i, i), coef),
                Slot::Gram { block, row, col } if row == col => ((block, row, col), coef),
                Slot::Gram { block, row, col } => ((block, row, col), coef / 2.0),
            };
            *merged.entry(key).or_insert(0.0) += value;
        }
        merged
            .into_iter()
            .filter(|(_, value)| *value != 0.0)
            .map(|((block, row, col), value)| SdpEntry {
                block,
                row,
                col,
                value,
            })
            .collect()
    }
}

/// Read-back view of a program after a usable solve.
pub struct SolvedProgram<'a> {
    program: &'a SosProgram,
    primal: &'a [DMatrix<f64>],
}

impl SolvedProgram<'_> {
    pub fn value(&self, v: DecisionVar) -> f64 {
        match self.program.slots.get(v.0) {
            Some(Slot::Nonneg(i)) => self.primal[self.program.lp_block()][(*i, *i)],
            Some(Slot::Gram { block, row, col }) => self.primal[*block][(*row, *col)],
            None => 0.0,
        }
    }

    pub fn eval(&self, expr: &LinExpr) -> f64 {
        expr.eval(|v| self.value(v))
    }

    /// Substitute solved values into a template polynomial.
    pub fn realize(&self, poly: &Polynomial<LinExpr>) -> Polynomial<f64> {
        poly.map_coefficients(|c| self.eval(c))
    }

    /// Symmetrised Gram matrix of a handle.
    pub fn gram(&self, handle: &SosHandle) -> DMatrix<f64> {
        let q = &self.primal[handle.block];
        (q + q.transpose()) * 0.5
    }

    pub fn decomposition(&self, handle: &SosHandle, tolerance: f64) -> SosDecomposition {
        SosDecomposition::from_gram(&self.gram(handle), handle.basis(), tolerance)
    }

    /// Largest violation among the recorded equalities, with its label.
    pub fn worst_equality(&self) -> Option<(&str, f64)> {
        self.program
            .equalities
            .iter()
            .map(|eq| (eq.label.as_str(), self.eval(&eq.expr).abs()))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}
