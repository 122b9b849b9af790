//! Sparse multivariate polynomials.
//!
//! Monomials are stored as sorted `(variable, exponent)` pairs with strictly
//! positive exponents, so every query about a variable's power is a lookup in
//! an explicit list rather than a parse of a rendered expression. The
//! coefficient ring is pluggable through [`Coefficient`]: numeric polynomials
//! use `f64`, while the SOS layer uses affine expressions over decision
//! variables and reuses every operation here unchanged.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::vars::{VarId, VarRegistry};

/// Coefficient ring for [`Polynomial`].
///
/// Only the operations that polynomial arithmetic needs against numeric
/// polynomials are required: accumulation and scaling by a real factor.
pub trait Coefficient: Clone + fmt::Debug + PartialEq {
    fn zero() -> Self;
    fn is_zero(&self) -> bool;
    fn add_assign_ref(&mut self, rhs: &Self);
    fn scale(&self, factor: f64) -> Self;
}

impl Coefficient for f64 {
    fn zero() -> Self {
        0.0
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn add_assign_ref(&mut self, rhs: &Self) {
        *self += *rhs;
    }

    fn scale(&self, factor: f64) -> Self {
        *self * factor
    }
}

/// Product of variable powers, kept sorted by variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<(VarId, u32)>", from = "Vec<(VarId, u32)>")]
pub struct Monomial {
    powers: Vec<(VarId, u32)>,
}

impl Monomial {
    /// The empty product.
    pub fn one() -> Self {
        Self::default()
    }

    pub fn var(v: VarId) -> Self {
        Self {
            powers: vec![(v, 1)],
        }
    }

    /// Build a monomial from arbitrary pairs; repeated variables are merged
    /// and zero exponents dropped.
    pub fn from_powers<I: IntoIterator<Item = (VarId, u32)>>(powers: I) -> Self {
        let mut merged: BTreeMap<VarId, u32> = BTreeMap::new();
        for (v, e) in powers {
            if e > 0 {
                *merged.entry(v).or_insert(0) += e;
            }
        }
        Self {
            powers: merged.into_iter().collect(),
        }
    }

    pub fn powers(&self) -> &[(VarId, u32)] {
        &self.powers
    }

    /// Total degree.
    pub fn degree(&self) -> u32 {
        self.powers.iter().map(|(_, e)| *e).sum()
    }

    pub fn is_one(&self) -> bool {
        self.powers.is_empty()
    }

    /// Power of `v` in this monomial; 0 when absent.
    pub fn exponent(&self, v: VarId) -> u32 {
        self.powers
            .binary_search_by_key(&v, |(var, _)| *var)
            .map(|i| self.powers[i].1)
            .unwrap_or(0)
    }

    /// This monomial with `v` removed.
    pub fn without(&self, v: VarId) -> Self {
        Self {
            powers: self
                .powers
                .iter()
                .copied()
                .filter(|(var, _)| *var != v)
                .collect(),
        }
    }

    pub fn times(&self, other: &Monomial) -> Self {
        Self::from_powers(self.powers.iter().chain(other.powers.iter()).copied())
    }

    fn write_with(&self, f: &mut fmt::Formatter<'_>, names: Option<&VarRegistry>) -> fmt::Result {
        for (i, (v, e)) in self.powers.iter().enumerate() {
            if i > 0 {
                f.write_str("*")?;
            }
            match names.and_then(|n| n.name(*v)) {
                Some(name) => f.write_str(name)?,
                None => write!(f, "{v}")?,
            }
            if *e > 1 {
                write!(f, "^{e}")?;
            }
        }
        Ok(())
    }
}

impl From<Vec<(VarId, u32)>> for Monomial {
    fn from(powers: Vec<(VarId, u32)>) -> Self {
        Monomial::from_powers(powers)
    }
}

impl From<Monomial> for Vec<(VarId, u32)> {
    fn from(m: Monomial) -> Self {
        m.powers
    }
}

/// All monomials in `vars` of total degree at most `max_degree`, graded
/// (degree 0 first).
pub fn monomials_up_to(vars: &[VarId], max_degree: u32) -> Vec<Monomial> {
    fn fill(
        vars: &[VarId],
        remaining: u32,
        prefix: &mut Vec<(VarId, u32)>,
        out: &mut Vec<Monomial>,
    ) {
        match vars.split_first() {
            None => {
                if remaining == 0 {
                    out.push(Monomial::from_powers(prefix.iter().copied()));
                }
            }
            Some((first, rest)) => {
                for e in (0..=remaining).rev() {
                    prefix.push((*first, e));
                    fill(rest, remaining - e, prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    let mut out = Vec::new();
    for degree in 0..=max_degree {
        let mut prefix = Vec::with_capacity(vars.len());
        fill(vars, degree, &mut prefix, &mut out);
    }
    out
}

/// Sparse polynomial with coefficients in `C`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial<C = f64> {
    terms: BTreeMap<Monomial, C>,
}

impl<C: Coefficient> Default for Polynomial<C> {
    fn default() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }
}

impl<C: Coefficient> Polynomial<C> {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(c: C) -> Self {
        Self::monomial(Monomial::one(), c)
    }

    pub fn monomial(m: Monomial, c: C) -> Self {
        let mut p = Self::zero();
        p.add_term(m, c);
        p
    }

    /// Accumulate `c · m`, dropping the term if it cancels to zero.
    pub fn add_term(&mut self, m: Monomial, c: C) {
        use std::collections::btree_map::Entry;
        match self.terms.entry(m) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().add_assign_ref(&c);
                if slot.get().is_zero() {
                    slot.remove();
                }
            }
            Entry::Vacant(slot) => {
                if !c.is_zero() {
                    slot.insert(c);
                }
            }
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, &C)> {
        self.terms.iter()
    }

    pub fn coefficient(&self, m: &Monomial) -> Option<&C> {
        self.terms.get(m)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Highest total degree among stored terms (0 for the zero polynomial).
    pub fn degree(&self) -> u32 {
        self.terms.keys().map(Monomial::degree).max().unwrap_or(0)
    }

    pub fn is_constant(&self) -> bool {
        self.terms.keys().all(Monomial::is_one)
    }

    pub fn variables(&self) -> BTreeSet<VarId> {
        self.terms
            .keys()
            .flat_map(|m| m.powers().iter().map(|(v, _)| *v))
            .collect()
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map_coefficients(|c| c.scale(factor))
    }

    pub fn map_coefficients<D: Coefficient>(&self, mut f: impl FnMut(&C) -> D) -> Polynomial<D> {
        let mut out = Polynomial::zero();
        for (m, c) in &self.terms {
            out.add_term(m.clone(), f(c));
        }
        out
    }

    /// Product with a numeric polynomial.
    pub fn mul_numeric(&self, rhs: &Polynomial<f64>) -> Self {
        let mut out = Self::zero();
        for (lm, lc) in &self.terms {
            for (rm, rc) in &rhs.terms {
                out.add_term(lm.times(rm), lc.scale(*rc));
            }
        }
        out
    }

    /// Substitute each variable in `subs` by a numeric polynomial. Variables
    /// without a substitution are left in place.
    pub fn compose(&self, subs: &BTreeMap<VarId, Polynomial<f64>>) -> Self {
        let mut cache: HashMap<(VarId, u32), Polynomial<f64>> = HashMap::new();
        let mut out = Self::zero();
        for (m, c) in &self.terms {
            let mut product = Polynomial::<f64>::constant(1.0);
            for &(v, e) in m.powers() {
                let factor = match subs.get(&v) {
                    Some(replacement) => cached_power(&mut cache, v, e, replacement),
                    None => Polynomial::monomial(Monomial::from_powers([(v, e)]), 1.0),
                };
                product = &product * &factor;
            }
            for (pm, pc) in product.terms {
                out.add_term(pm, c.scale(pc));
            }
        }
        out
    }

    /// Partial derivative with respect to `v`.
    pub fn derivative(&self, v: VarId) -> Self {
        let mut out = Self::zero();
        for (m, c) in &self.terms {
            let e = m.exponent(v);
            if e == 0 {
                continue;
            }
            let lowered = Monomial::from_powers(
                m.powers()
                    .iter()
                    .map(|&(var, exp)| if var == v { (var, exp - 1) } else { (var, exp) }),
            );
            out.add_term(lowered, c.scale(e as f64));
        }
        out
    }

    /// Substitute `v ↦ v + offset`.
    pub fn shift(&self, v: VarId, offset: f64) -> Self {
        if offset == 0.0 {
            return self.clone();
        }
        let mut subs = BTreeMap::new();
        subs.insert(
            v,
            Polynomial::var(v) + Polynomial::<f64>::constant(offset),
        );
        self.compose(&subs)
    }
}

fn cached_power(
    cache: &mut HashMap<(VarId, u32), Polynomial<f64>>,
    v: VarId,
    e: u32,
    base: &Polynomial<f64>,
) -> Polynomial<f64> {
    if let Some(hit) = cache.get(&(v, e)) {
        return hit.clone();
    }
    let value = if e == 1 {
        base.clone()
    } else {
        let lower = cached_power(cache, v, e - 1, base);
        &lower * base
    };
    cache.insert((v, e), value.clone());
    value
}

impl Polynomial<f64> {
    pub fn var(v: VarId) -> Self {
        Self::monomial(Monomial::var(v), 1.0)
    }

    pub fn pow(&self, mut e: u32) -> Self {
        let mut base = self.clone();
        let mut acc = Self::constant(1.0);
        while e > 0 {
            if e & 1 == 1 {
                acc = &acc * &base;
            }
            e >>= 1;
            if e > 0 {
                base = &base * &base;
            }
        }
        acc
    }

    /// Evaluate with `value(v)` supplying each variable.
    pub fn eval_with(&self, value: impl Fn(VarId) -> f64) -> f64 {
        self.terms
            .iter()
            .map(|(m, c)| {
                m.powers()
                    .iter()
                    .fold(*c, |acc, &(v, e)| acc * value(v).powi(e as i32))
            })
            .sum()
    }

    /// Evaluate at a point indexed by `VarId`. Variables past the end of
    /// `point` evaluate to zero.
    pub fn eval(&self, point: &[f64]) -> f64 {
        self.eval_with(|v| point.get(v.index()).copied().unwrap_or(0.0))
    }

    /// Drop terms whose magnitude is at most `tolerance`.
    pub fn pruned(&self, tolerance: f64) -> Self {
        Self {
            terms: self
                .terms
                .iter()
                .filter(|(_, c)| c.abs() > tolerance)
                .map(|(m, c)| (m.clone(), *c))
                .collect(),
        }
    }

    pub fn max_abs_coefficient(&self) -> f64 {
        self.terms.values().fold(0.0, |acc, c| acc.max(c.abs()))
    }

    /// Render with user-facing variable names.
    pub fn display<'a>(&'a self, names: &'a VarRegistry) -> PolyDisplay<'a> {
        PolyDisplay {
            poly: self,
            names: Some(names),
        }
    }
}

/// Display adapter that resolves variable names through a registry.
pub struct PolyDisplay<'a> {
    poly: &'a Polynomial<f64>,
    names: Option<&'a VarRegistry>,
}

impl fmt::Display for PolyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.poly.is_zero() {
            return f.write_str("0");
        }
        let mut ordered: Vec<(&Monomial, f64)> =
            self.poly.terms.iter().map(|(m, c)| (m, *c)).collect();
        ordered.sort_by(|a, b| b.0.degree().cmp(&a.0.degree()).then(a.0.cmp(b.0)));
        for (i, (m, c)) in ordered.into_iter().enumerate() {
            let magnitude = c.abs();
            if i == 0 {
                if c < 0.0 {
                    f.write_str("-")?;
                }
            } else if c < 0.0 {
                f.write_str(" - ")?;
            } else {
                f.write_str(" + ")?;
            }
            if m.is_one() {
                write!(f, "{magnitude}")?;
            } else {
                if magnitude != 1.0 {
                    write!(f, "{magnitude}*")?;
                }
                m.write_with(f, self.names)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Polynomial<f64> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PolyDisplay {
            poly: self,
            names: None,
        }
        .fmt(f)
    }
}

impl<C: Coefficient> FromIterator<(Monomial, C)> for Polynomial<C> {
    fn from_iter<I: IntoIterator<Item = (Monomial, C)>>(iter: I) -> Self {
        let mut p = Self::zero();
        for (m, c) in iter {
            p.add_term(m, c);
        }
        p
    }
}

impl<C: Coefficient> Add for Polynomial<C> {
    type Output = Polynomial<C>;

    fn add(mut self, rhs: Polynomial<C>) -> Self::Output {
        for (m, c) in rhs.terms {
            self.add_term(m, c);
        }
        self
    }
}

impl<C: Coefficient> Add<&Polynomial<C>> for &Polynomial<C> {
    type Output = Polynomial<C>;

    fn add(self, rhs: &Polynomial<C>) -> Self::Output {
        let mut out = self.clone();
        for (m, c) in &rhs.terms {
            out.add_term(m.clone(), c.clone());
        }
        out
    }
}

impl<C: Coefficient> Sub for Polynomial<C> {
    type Output = Polynomial<C>;

    fn sub(mut self, rhs: Polynomial<C>) -> Self::Output {
        for (m, c) in rhs.terms {
            self.add_term(m, c.scale(-1.0));
        }
        self
    }
}

impl<C: Coefficient> Sub<&Polynomial<C>> for &Polynomial<C> {
    type Output = Polynomial<C>;

    fn sub(self, rhs: &Polynomial<C>) -> Self::Output {
        let mut out = self.clone();
        for (m, c) in &rhs.terms {
            out.add_term(m.clone(), c.scale(-1.0));
        }
        out
    }
}

impl<C: Coefficient> Neg for Polynomial<C> {
    type Output = Polynomial<C>;

    fn neg(self) -> Self::Output {
        self.scale(-1.0)
    }
}

impl<C: Coefficient> Mul<&Polynomial<f64>> for &Polynomial<C> {
    type Output = Polynomial<C>;

    fn mul(self, rhs: &Polynomial<f64>) -> Self::Output {
        self.mul_numeric(rhs)
    }
}

impl<C: Coefficient> Mul<Polynomial<f64>> for Polynomial<C> {
    type Output = Polynomial<C>;

    fn mul(self, rhs: Polynomial<f64>) -> Self::Output {
        self.mul_numeric(&rhs)
    }
}

impl<C: Coefficient> Sum for Polynomial<C> {
    fn sum<I: Iterator<Item = Polynomial<C>>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, p| acc + p)
    }
}

#[derive(Serialize)]
struct TermRef<'a, C> {
    monomial: &'a Monomial,
    coefficient: &'a C,
}

#[derive(Deserialize)]
struct TermOwned<C> {
    monomial: Monomial,
    coefficient: C,
}

impl<C: Coefficient + Serialize> Serialize for Polynomial<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            self.terms
                .iter()
                .map(|(monomial, coefficient)| TermRef {
                    monomial,
                    coefficient,
                }),
        )
    }
}

impl<'de, C: Coefficient + Deserialize<'de>> Deserialize<'de> for Polynomial<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let terms = Vec::<TermOwned<C>>::deserialize(deserializer)?;
        Ok(terms
            .into_iter()
            .map(|t| (t.monomial, t.coefficient))
            .collect())
    }
}
