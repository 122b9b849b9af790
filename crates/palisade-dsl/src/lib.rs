#![doc = include_str!("../README.md")]

pub mod errors;
pub mod parser;

pub use errors::ExprError;
pub use parser::{parse_polynomial, parse_polynomials, MAX_EXPONENT};
