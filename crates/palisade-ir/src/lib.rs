#![doc = include_str!("../README.md")]

//! Palisade intermediate representation.
//!
//! Everything downstream (expression parsing, moment substitution, SOS
//! assembly) manipulates the types defined here.

pub mod poly;
pub mod region;
pub mod vars;

use thiserror::Error;

pub use poly::{monomials_up_to, Coefficient, Monomial, Polynomial};
pub use region::{box_polynomials, HyperRectangle};
pub use vars::{VarId, VarRegistry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolyError {
    #[error("Variable `{0}` is declared more than once")]
    DuplicateVariable(String),
    #[error("Variable names must be non-empty")]
    EmptyVariableName,
}
