use serde::{Deserialize, Serialize};

use crate::poly::Polynomial;
use crate::vars::VarId;

/// Axis-aligned box `{x | lower_i <= x_i <= upper_i}`.
///
/// `lower <= upper` is assumed elementwise and not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperRectangle {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl HyperRectangle {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn dimension(&self) -> usize {
        self.lower.len().min(self.upper.len())
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(x, (l, u))| *l <= *x && *x <= *u)
    }

    /// Membership polynomials over `vars`; see [`box_polynomials`].
    pub fn polynomials(&self, vars: &[VarId]) -> Vec<Polynomial> {
        box_polynomials(vars, &self.lower, &self.upper)
    }
}

/// `(x_i - L_i)(U_i - x_i)` for each dimension.
///
/// The box is exactly the set where every returned polynomial is
/// non-negative, and the boundary is where at least one of them vanishes.
pub fn box_polynomials(vars: &[VarId], lower: &[f64], upper: &[f64]) -> Vec<Polynomial> {
    vars.iter()
        .zip(lower.iter().zip(upper))
        .map(|(&v, (&l, &u))| {
            let x = Polynomial::var(v);
            let above = &x - &Polynomial::constant(l);
            let below = Polynomial::constant(u) - x;
            above * below
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn one_dimensional_box_polynomial() {
        let g = box_polynomials(&[VarId(0)], &[-6.0], &[6.0]);
        assert_eq!(g.len(), 1);
        // (x + 6)(6 - x) = 36 - x^2
        assert_eq!(g[0].eval(&[0.0]), 36.0);
        assert_eq!(g[0].eval(&[6.0]), 0.0);
        assert_eq!(g[0].eval(&[-6.0]), 0.0);
        assert!(g[0].eval(&[7.0]) < 0.0);
        assert_eq!(g[0].degree(), 2);
    }

    #[test]
    fn degenerate_box_is_a_single_point() {
        let g = box_polynomials(&[VarId(0)], &[2.0], &[2.0]);
        assert_eq!(g[0].eval(&[2.0]), 0.0);
        assert!(g[0].eval(&[2.5]) < 0.0);
        assert!(g[0].eval(&[1.5]) < 0.0);
    }

    proptest! {
        // Integer-valued inputs keep the polynomial evaluation exact.
        #[test]
        fn nonnegative_exactly_inside_closed_box(
            bounds in prop::collection::vec((-40i32..40, 0i32..40), 1..4),
            offsets in prop::collection::vec(-60i32..60, 4),
        ) {
            let dim = bounds.len();
            let vars: Vec<VarId> = (0..dim as u32).map(VarId).collect();
            let lower: Vec<f64> = bounds.iter().map(|(l, _)| *l as f64).collect();
            let upper: Vec<f64> = bounds.iter().map(|(l, w)| (*l + *w) as f64).collect();
            let point: Vec<f64> = offsets[..dim].iter().map(|o| *o as f64).collect();
            let rect = HyperRectangle::new(lower.clone(), upper.clone());
            let polys = rect.polynomials(&vars);

            let all_nonneg = polys.iter().all(|g| g.eval(&point) >= 0.0);
            prop_assert_eq!(all_nonneg, rect.contains(&point));

            for (i, g) in polys.iter().enumerate() {
                let on_face = point[i] == lower[i] || point[i] == upper[i];
                prop_assert_eq!(g.eval(&point) == 0.0, on_face);
            }
        }
    }
}
