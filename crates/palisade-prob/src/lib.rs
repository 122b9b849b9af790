#![doc = include_str!("../README.md")]

pub mod moments;
pub mod noise;

use thiserror::Error;

pub use moments::{expectation, exponential_moment, normal_moment, uniform_moment};
pub use noise::{NoiseDistribution, NoiseType};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MomentError {
    #[error("Unsupported noise type `{0}` (expected normal, exponential or uniform)")]
    UnsupportedNoiseType(String),
    #[error("Noise type `{noise}` requires parameter `{parameter}`")]
    MissingParameter {
        noise: &'static str,
        parameter: &'static str,
    },
    #[error("Noise parameter {parameter}[{index}] = {value} is invalid: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        index: usize,
        value: f64,
        reason: &'static str,
    },
    #[error("Noise parameters describe {expected} dimension(s) but {found} were given")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Moment of order {order} does not fit in f64")]
    PrecisionOverflow { order: u32 },
}
