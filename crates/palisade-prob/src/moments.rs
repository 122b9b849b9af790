//! Raw moments and the expectation operator over noise variables.

use num::bigint::BigUint;
use num::traits::{One, ToPrimitive};

use palisade_ir::{Coefficient, Polynomial, VarId};

use crate::noise::NoiseDistribution;
use crate::MomentError;

/// Exact `k!`.
fn factorial(k: u32) -> BigUint {
    (2..=k).fold(BigUint::one(), |acc, i| acc * BigUint::from(i))
}

/// Exact `k!!` (product of every other integer down to 1 or 2).
fn double_factorial(k: u32) -> BigUint {
    let mut result = BigUint::one();
    let mut i = k;
    while i > 1 {
        result *= BigUint::from(i);
        i -= 2;
    }
    result
}

fn to_finite_f64(value: &BigUint, order: u32) -> Result<f64, MomentError> {
    value
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or(MomentError::PrecisionOverflow { order })
}

/// `E[ς^k]` for `ς ~ N(0, σ²)`.
///
/// # Parameters
/// - `sigma`: standard deviation.
/// - `k`: moment order.
///
/// # Returns
/// `0` for odd `k`, `σ^k (k-1)!!` for even `k` (so `1` for `k = 0`).
pub fn normal_moment(sigma: f64, k: u32) -> Result<f64, MomentError> {
    if k % 2 == 1 {
        return Ok(0.0);
    }
    if k == 0 {
        return Ok(1.0);
    }
    let df = to_finite_f64(&double_factorial(k - 1), k)?;
    Ok(sigma.powi(k as i32) * df)
}

/// `E[ς^k]` for `ς ~ Exp(rate)`.
///
/// # Parameters
/// - `rate`: rate parameter `r > 0`.
/// - `k`: moment order.
///
/// # Returns
/// `k! / r^k`.
pub fn exponential_moment(rate: f64, k: u32) -> Result<f64, MomentError> {
    let f = to_finite_f64(&factorial(k), k)?;
    let value = f / rate.powi(k as i32);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MomentError::PrecisionOverflow { order: k })
    }
}

/// `E[ς^k]` for `ς ~ U[a, b]`.
///
/// A degenerate interval `a = b` is a point mass at `a`.
pub fn uniform_moment(a: f64, b: f64, k: u32) -> f64 {
    if a == b {
        return a.powi(k as i32);
    }
    let e = k as i32 + 1;
    (b.powi(e) - a.powi(e)) / ((k as f64 + 1.0) * (b - a))
}

/// Expectation of `poly` over independent noise variables.
///
/// `noise_vars[d]` is the symbol of noise dimension `d` in `dist`. Each
/// dimension is eliminated in turn: every monomial `m · ς_d^k` becomes
/// `E[ς_d^k] · m`, read off the monomial's explicit exponent list, so a bare
/// `ς_d` and `ς_d^1` are the same term. Works over any coefficient ring.
pub fn expectation<C: Coefficient>(
    poly: &Polynomial<C>,
    noise_vars: &[VarId],
    dist: &NoiseDistribution,
) -> Result<Polynomial<C>, MomentError> {
    if noise_vars.len() != dist.dimension() {
        return Err(MomentError::DimensionMismatch {
            expected: dist.dimension(),
            found: noise_vars.len(),
        });
    }
    let mut current = poly.clone();
    for (dim, &var) in noise_vars.iter().enumerate() {
        current = eliminate(&current, var, |k| dist.moment(dim, k))?;
    }
    Ok(current)
}

fn eliminate<C: Coefficient>(
    poly: &Polynomial<C>,
    var: VarId,
    moment: impl Fn(u32) -> Result<f64, MomentError>,
) -> Result<Polynomial<C>, MomentError> {
    let mut cache: Vec<Option<f64>> = Vec::new();
    let mut out = Polynomial::zero();
    for (m, c) in poly.terms() {
        let k = m.exponent(var);
        if k == 0 {
            out.add_term(m.clone(), c.clone());
            continue;
        }
        let idx = k as usize;
        if cache.len() <= idx {
            cache.resize(idx + 1, None);
        }
        let value = match cache[idx] {
            Some(v) => v,
            None => {
                let v = moment(k)?;
                cache[idx] = Some(v);
                v
            }
        };
        out.add_term(m.without(var), c.scale(value));
    }
    Ok(out)
}
