//! The four certificate variants.
//!
//! Every variant shares one assembly routine (see [`crate::synthesis`]) and
//! differs only in how the drift condition and the level-set inequality are
//! formed, and in whether noise is averaged out.

use std::collections::BTreeMap;

use palisade_ir::{Polynomial, VarId};
use palisade_prob::{expectation, MomentError, NoiseDistribution, NoiseType};
use palisade_sos::LinExpr;

use crate::params::{CertificateProblem, NoiseModel, SystemMode};

/// Inputs available when forming the drift condition.
pub struct DriftContext<'a> {
    /// Barrier template with decision-variable coefficients.
    pub barrier: &'a Polynomial<LinExpr>,
    pub state: &'a [VarId],
    pub dynamics: &'a [Polynomial],
    /// Drift slack `c`, stochastic variants only.
    pub c: Option<&'a LinExpr>,
}

impl DriftContext<'_> {
    /// `B(f(x))`, with noise symbols left in place.
    pub fn composed(&self) -> Polynomial<LinExpr> {
        let subs: BTreeMap<VarId, Polynomial> = self
            .state
            .iter()
            .copied()
            .zip(self.dynamics.iter().cloned())
            .collect();
        self.barrier.compose(&subs)
    }

    /// `∇B · f`.
    pub fn lie_derivative(&self) -> Polynomial<LinExpr> {
        self.state
            .iter()
            .zip(self.dynamics)
            .map(|(&x, f)| &self.barrier.derivative(x) * f)
            .sum()
    }

    fn slack(&self) -> Polynomial<LinExpr> {
        match self.c {
            Some(c) => Polynomial::constant(c.clone()),
            None => Polynomial::zero(),
        }
    }
}

/// Resolved or symbolic level-set scalars.
pub struct LevelScalars<'a> {
    pub gamma: &'a LinExpr,
    pub lambda: &'a LinExpr,
    pub c: Option<&'a LinExpr>,
    pub horizon: f64,
    /// Target confidence; `None` when absent or zero.
    pub confidence: Option<f64>,
}

impl LevelScalars<'_> {
    fn c_times_horizon(&self) -> LinExpr {
        match self.c {
            Some(c) => c * self.horizon,
            None => LinExpr::default(),
        }
    }
}

/// Hooks distinguishing one certificate variant from another.
pub trait CertificateVariant: Send + Sync {
    fn mode(&self) -> SystemMode;

    /// Average a polynomial over the noise. Deterministic variants have no
    /// noise and return the input unchanged.
    fn expectation(&self, poly: Polynomial<LinExpr>) -> Result<Polynomial<LinExpr>, MomentError> {
        Ok(poly)
    }

    /// Expression `D` such that the drift condition reads
    /// `D - Σ Ls_i·gs_i` is SOS.
    fn drift(&self, ctx: &DriftContext<'_>) -> Result<Polynomial<LinExpr>, MomentError>;

    /// Left-hand side of the strict level-set inequality `lhs > 0`.
    fn level_set(&self, s: &LevelScalars<'_>) -> LinExpr;
}

/// `B(x) - B(f(x))`.
pub struct DiscreteDeterministic;

impl CertificateVariant for DiscreteDeterministic {
    fn mode(&self) -> SystemMode {
        SystemMode::DiscreteDeterministic
    }

    fn drift(&self, ctx: &DriftContext<'_>) -> Result<Polynomial<LinExpr>, MomentError> {
        Ok(ctx.barrier - &ctx.composed())
    }

    fn level_set(&self, s: &LevelScalars<'_>) -> LinExpr {
        s.lambda - s.gamma
    }
}

/// `-∇B·f`.
pub struct ContinuousDeterministic;

impl CertificateVariant for ContinuousDeterministic {
    fn mode(&self) -> SystemMode {
        SystemMode::ContinuousDeterministic
    }

    fn drift(&self, ctx: &DriftContext<'_>) -> Result<Polynomial<LinExpr>, MomentError> {
        Ok(-ctx.lie_derivative())
    }

    fn level_set(&self, s: &LevelScalars<'_>) -> LinExpr {
        s.lambda - s.gamma
    }
}

/// `B(x) - E[B(f(x, ς))] + c`.
pub struct DiscreteStochastic {
    noise_vars: Vec<VarId>,
    distribution: NoiseDistribution,
}

impl DiscreteStochastic {
    pub fn new(noise_vars: Vec<VarId>, distribution: NoiseDistribution) -> Self {
        Self {
            noise_vars,
            distribution,
        }
    }
}

impl CertificateVariant for DiscreteStochastic {
    fn mode(&self) -> SystemMode {
        SystemMode::DiscreteStochastic
    }

    fn expectation(&self, poly: Polynomial<LinExpr>) -> Result<Polynomial<LinExpr>, MomentError> {
        expectation(&poly, &self.noise_vars, &self.distribution)
    }

    fn drift(&self, ctx: &DriftContext<'_>) -> Result<Polynomial<LinExpr>, MomentError> {
        let averaged = self.expectation(ctx.composed())?;
        Ok(ctx.barrier - &averaged + ctx.slack())
    }

    fn level_set(&self, s: &LevelScalars<'_>) -> LinExpr {
        let lambda = match s.confidence {
            Some(phi) => s.lambda * phi,
            None => s.lambda.clone(),
        };
        lambda - s.gamma.clone() - s.c_times_horizon()
    }
}

/// `-𝓛B + c` for a jump-diffusion.
pub struct ContinuousStochastic {
    diffusion: Vec<Polynomial>,
    jump_reset: Vec<f64>,
    jump_rate: Vec<f64>,
}

impl ContinuousStochastic {
    pub fn new(diffusion: Vec<Polynomial>, jump_reset: Vec<f64>, jump_rate: Vec<f64>) -> Self {
        Self {
            diffusion,
            jump_reset,
            jump_rate,
        }
    }

    /// `𝓛B = ∇B·f + ½(Σδ_i²)(Σ_j ∂²B/∂x_j²) + Σ_j ω_j(B(x + ρ_j e_j) - B(x))`.
    pub fn generator(&self, ctx: &DriftContext<'_>) -> Polynomial<LinExpr> {
        let b = ctx.barrier;
        let diffusion_sq: Polynomial = self.diffusion.iter().map(|d| d.pow(2)).sum();
        let laplacian: Polynomial<LinExpr> = ctx
            .state
            .iter()
            .map(|&x| b.derivative(x).derivative(x))
            .sum();
        let jumps: Polynomial<LinExpr> = ctx
            .state
            .iter()
            .zip(self.jump_reset.iter().zip(&self.jump_rate))
            .filter(|(_, (_, rate))| **rate != 0.0)
            .map(|(&x, (&reset, &rate))| (&b.shift(x, reset) - b).scale(rate))
            .sum();
        ctx.lie_derivative() + &laplacian * &diffusion_sq.scale(0.5) + jumps
    }
}

impl CertificateVariant for ContinuousStochastic {
    fn mode(&self) -> SystemMode {
        SystemMode::ContinuousStochastic
    }

    fn drift(&self, ctx: &DriftContext<'_>) -> Result<Polynomial<LinExpr>, MomentError> {
        Ok(ctx.slack() - self.generator(ctx))
    }

    fn level_set(&self, s: &LevelScalars<'_>) -> LinExpr {
        let lambda = match s.confidence {
            Some(phi) => s.lambda * (1.0 - phi),
            None => s.lambda.clone(),
        };
        lambda - s.gamma.clone() - s.c_times_horizon()
    }
}

/// Pick the variant for a validated problem.
///
/// Fails only for discrete noise whose type or parameters cannot form a
/// distribution.
pub fn variant_for(problem: &CertificateProblem) -> Result<Box<dyn CertificateVariant>, MomentError> {
    match (problem.mode, problem.stochastic.as_ref().map(|s| &s.noise)) {
        (SystemMode::DiscreteDeterministic, _) => Ok(Box::new(DiscreteDeterministic)),
        (SystemMode::ContinuousDeterministic, _) => Ok(Box::new(ContinuousDeterministic)),
        (
            SystemMode::DiscreteStochastic,
            Some(NoiseModel::Discrete {
                noise_vars,
                noise_type,
                sigma,
                rate,
                a,
                b,
            }),
        ) => {
            let noise_type: NoiseType = noise_type.parse()?;
            let distribution = NoiseDistribution::from_parts(
                noise_type,
                sigma.as_deref(),
                rate.as_deref(),
                a.as_deref(),
                b.as_deref(),
            )?;
            distribution.validate()?;
            if distribution.dimension() != noise_vars.len() {
                return Err(MomentError::DimensionMismatch {
                    expected: noise_vars.len(),
                    found: distribution.dimension(),
                });
            }
            Ok(Box::new(DiscreteStochastic::new(noise_vars.clone(), distribution)))
        }
        (
            SystemMode::ContinuousStochastic,
            Some(NoiseModel::JumpDiffusion {
                diffusion,
                jump_reset,
                jump_rate,
            }),
        ) => Ok(Box::new(ContinuousStochastic::new(
            diffusion.clone(),
            jump_reset.clone(),
            jump_rate.clone(),
        ))),
        // CertificateProblem::from_job rejects every other pairing
        (mode, _) => Err(MomentError::UnsupportedNoiseType(format!(
            "no noise model for {mode}"
        ))),
    }
}
