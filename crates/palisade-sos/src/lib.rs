#![doc = include_str!("../README.md")]

//! SOS layer for barrier-certificate synthesis.

pub mod backends;
pub mod decomposition;
pub mod linear;
pub mod program;
pub mod sdp;

pub use decomposition::{SosDecomposition, SquareTerm};
pub use linear::{DecisionVar, LinExpr};
pub use program::{ProgramError, SolvedProgram, SosHandle, SosProgram};
pub use sdp::{BlockKind, SdpConstraint, SdpEntry, SdpProblem, SdpSolution, SdpSolver, SdpStatus};
