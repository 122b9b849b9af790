use nalgebra::DMatrix;

use palisade_ir::{Monomial, Polynomial};

/// One weighted square `weight · polynomial²`.
#[derive(Debug, Clone, PartialEq)]
pub struct SquareTerm {
    pub weight: f64,
    pub polynomial: Polynomial,
}

/// Sum-of-squares decomposition recovered from a Gram matrix.
///
/// An empty decomposition means the matrix was not (numerically) PSD or had
/// no significant eigenvalue, so no certificate can be read from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SosDecomposition {
    terms: Vec<SquareTerm>,
}

impl SosDecomposition {
    /// Eigen-decompose `gram` over `basis`.
    ///
    /// Eigenvalues below `-tolerance · scale` reject the whole matrix, where
    /// `scale = max(1, max |eigenvalue|)`. Eigenvalues above
    /// `tolerance · scale` each contribute one square; the rest are treated
    /// as zero.
    pub fn from_gram(gram: &DMatrix<f64>, basis: &[Monomial], tolerance: f64) -> Self {
        let n = basis.len();
        if n == 0 || gram.nrows() != n || gram.ncols() != n {
            return Self::default();
        }
        if gram.iter().any(|v| !v.is_finite()) {
            return Self::default();
        }
        let symmetric = (gram + gram.transpose()) * 0.5;
        let eigen = symmetric.symmetric_eigen();
        let scale = eigen
            .eigenvalues
            .iter()
            .fold(1.0f64, |acc, v| acc.max(v.abs()));
        let cutoff = tolerance * scale;
        if eigen.eigenvalues.iter().any(|&v| v < -cutoff) {
            return Self::default();
        }
        let mut terms = Vec::new();
        for (k, &weight) in eigen.eigenvalues.iter().enumerate() {
            if weight <= cutoff {
                continue;
            }
            let column = eigen.eigenvectors.column(k);
            let polynomial: Polynomial = basis
                .iter()
                .zip(column.iter())
                .map(|(m, &c)| (m.clone(), c))
                .collect();
            terms.push(SquareTerm { weight, polynomial });
        }
        Self { terms }
    }

    pub fn terms(&self) -> &[SquareTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// `Σ weight · polynomial²`.
    pub fn to_polynomial(&self) -> Polynomial {
        self.terms
            .iter()
            .map(|t| t.polynomial.pow(2).scale(t.weight))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_ir::{monomials_up_to, VarId};

    #[test]
    fn identity_gram_gives_one_square_per_basis_element() {
        let basis = monomials_up_to(&[VarId(0)], 1);
        let dec = SosDecomposition::from_gram(&DMatrix::identity(2, 2), &basis, 1e-9);
        assert_eq!(dec.len(), 2);
        let x = Polynomial::var(VarId(0));
        let expected = Polynomial::constant(1.0) + x.pow(2);
        let rebuilt = dec.to_polynomial();
        for (m, c) in expected.terms() {
            assert!((rebuilt.coefficient(m).copied().unwrap_or(0.0) - c).abs() < 1e-12);
        }
        assert!(rebuilt.pruned(1e-12).len() == 2);
    }

    #[test]
    fn indefinite_gram_has_no_decomposition() {
        let basis = monomials_up_to(&[VarId(0)], 1);
        let gram = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(SosDecomposition::from_gram(&gram, &basis, 1e-9).is_empty());
    }

    #[test]
    fn zero_gram_has_no_decomposition() {
        let basis = monomials_up_to(&[VarId(0)], 1);
        assert!(SosDecomposition::from_gram(&DMatrix::zeros(2, 2), &basis, 1e-9).is_empty());
    }

    #[test]
    fn tiny_negative_eigenvalues_are_tolerated() {
        let basis = monomials_up_to(&[VarId(0)], 1);
        let gram = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1e-12]);
        assert_eq!(SosDecomposition::from_gram(&gram, &basis, 1e-9).len(), 1);
    }

    #[test]
    fn mismatched_basis_is_rejected() {
        let basis = monomials_up_to(&[VarId(0)], 2);
        assert!(SosDecomposition::from_gram(&DMatrix::identity(2, 2), &basis, 1e-9).is_empty());
    }
}
