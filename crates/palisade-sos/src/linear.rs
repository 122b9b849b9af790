use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use palisade_ir::Coefficient;

/// Index of a scalar decision variable in an [`SosProgram`](crate::SosProgram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecisionVar(pub usize);

impl fmt::Display for DecisionVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// Affine expression `constant + Σ coef · var` over decision variables.
///
/// This is the coefficient ring of template polynomials: a barrier template
/// is a `Polynomial<LinExpr>` whose coefficients are still unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    constant: f64,
    terms: BTreeMap<DecisionVar, f64>,
}

impl LinExpr {
    pub fn constant(c: f64) -> Self {
        Self {
            constant: c,
            terms: BTreeMap::new(),
        }
    }

    pub fn var(v: DecisionVar) -> Self {
        Self::term(v, 1.0)
    }

    pub fn term(v: DecisionVar, coef: f64) -> Self {
        let mut out = Self::default();
        out.add_var(v, coef);
        out
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (DecisionVar, f64)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, *c))
    }

    pub fn coefficient(&self, v: DecisionVar) -> f64 {
        self.terms.get(&v).copied().unwrap_or(0.0)
    }

    /// True when no decision variable appears.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn add_var(&mut self, v: DecisionVar, coef: f64) {
        if coef == 0.0 {
            return;
        }
        let slot = self.terms.entry(v).or_insert(0.0);
        *slot += coef;
        if *slot == 0.0 {
            self.terms.remove(&v);
        }
    }

    /// Evaluate with `value(v)` supplying each decision variable.
    pub fn eval(&self, value: impl Fn(DecisionVar) -> f64) -> f64 {
        self.terms
            .iter()
            .fold(self.constant, |acc, (v, c)| acc + c * value(*v))
    }
}

impl Coefficient for LinExpr {
    fn zero() -> Self {
        Self::default()
    }

    fn is_zero(&self) -> bool {
        self.constant == 0.0 && self.terms.is_empty()
    }

    fn add_assign_ref(&mut self, rhs: &Self) {
        self.constant += rhs.constant;
        for (v, c) in &rhs.terms {
            self.add_var(*v, *c);
        }
    }

    fn scale(&self, factor: f64) -> Self {
        if factor == 0.0 {
            return Self::default();
        }
        Self {
            constant: self.constant * factor,
            terms: self.terms.iter().map(|(v, c)| (*v, c * factor)).collect(),
        }
    }
}

impl From<f64> for LinExpr {
    fn from(c: f64) -> Self {
        Self::constant(c)
    }
}

impl From<DecisionVar> for LinExpr {
    fn from(v: DecisionVar) -> Self {
        Self::var(v)
    }
}

impl Add for LinExpr {
    type Output = LinExpr;

    fn add(mut self, rhs: LinExpr) -> LinExpr {
        self.add_assign_ref(&rhs);
        self
    }
}

impl Add<&LinExpr> for &LinExpr {
    type Output = LinExpr;

    fn add(self, rhs: &LinExpr) -> LinExpr {
        let mut out = self.clone();
        out.add_assign_ref(rhs);
        out
    }
}

impl Sub for LinExpr {
    type Output = LinExpr;

    fn sub(mut self, rhs: LinExpr) -> LinExpr {
        self.add_assign_ref(&rhs.scale(-1.0));
        self
    }
}

impl Sub<&LinExpr> for &LinExpr {
    type Output = LinExpr;

    fn sub(self, rhs: &LinExpr) -> LinExpr {
        let mut out = self.clone();
        out.add_assign_ref(&rhs.scale(-1.0));
        out
    }
}

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self.scale(-1.0)
    }
}

impl Mul<f64> for LinExpr {
    type Output = LinExpr;

    fn mul(self, rhs: f64) -> LinExpr {
        self.scale(rhs)
    }
}

impl Mul<f64> for &LinExpr {
    type Output = LinExpr;

    fn mul(self, rhs: f64) -> LinExpr {
        self.scale(rhs)
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if first {
                write!(f, "{c}*{v}")?;
            } else if *c < 0.0 {
                write!(f, " - {}*{v}", -c)?;
            } else {
                write!(f, " + {c}*{v}")?;
            }
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant < 0.0 {
            write!(f, " - {}", -self.constant)
        } else if self.constant > 0.0 {
            write!(f, " + {}", self.constant)
        } else {
            Ok(())
        }
    }
}
