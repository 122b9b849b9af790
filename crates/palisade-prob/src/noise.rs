use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::moments::{exponential_moment, normal_moment, uniform_moment};
use crate::MomentError;

/// Distribution family tag as written in parameter records.
///
/// Parsing is case-insensitive and accepts `gaussian` for `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum NoiseType {
    Normal,
    Exponential,
    Uniform,
}

impl NoiseType {
    pub fn as_str(self) -> &'static str {
        match self {
            NoiseType::Normal => "normal",
            NoiseType::Exponential => "exponential",
            NoiseType::Uniform => "uniform",
        }
    }
}

impl fmt::Display for NoiseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoiseType {
    type Err = MomentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "gaussian" => Ok(NoiseType::Normal),
            "exponential" => Ok(NoiseType::Exponential),
            "uniform" => Ok(NoiseType::Uniform),
            _ => Err(MomentError::UnsupportedNoiseType(s.to_string())),
        }
    }
}

impl TryFrom<String> for NoiseType {
    type Error = MomentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Independent per-dimension noise with zero-mean normal, exponential or
/// uniform marginals. Every parameter vector has one entry per noise
/// dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NoiseDistribution {
    Normal { sigma: Vec<f64> },
    Exponential { rate: Vec<f64> },
    Uniform { lower: Vec<f64>, upper: Vec<f64> },
}

impl NoiseDistribution {
    /// Build a distribution from the loose optional fields of a parameter
    /// record, picking the ones the noise type needs.
    ///
    /// # Parameters
    /// - `noise_type`: distribution family.
    /// - `sigma`: standard deviations (normal).
    /// - `rate`: rates (exponential).
    /// - `a`, `b`: interval bounds (uniform).
    ///
    /// # Returns
    /// The distribution, or [`MomentError::MissingParameter`] when a required
    /// vector is absent and [`MomentError::DimensionMismatch`] when the
    /// uniform bounds differ in length.
    pub fn from_parts(
        noise_type: NoiseType,
        sigma: Option<&[f64]>,
        rate: Option<&[f64]>,
        a: Option<&[f64]>,
        b: Option<&[f64]>,
    ) -> Result<Self, MomentError> {
        let missing = |parameter| MomentError::MissingParameter {
            noise: noise_type.as_str(),
            parameter,
        };
        match noise_type {
            NoiseType::Normal => Ok(NoiseDistribution::Normal {
                sigma: sigma.ok_or_else(|| missing("sigma"))?.to_vec(),
            }),
            NoiseType::Exponential => Ok(NoiseDistribution::Exponential {
                rate: rate.ok_or_else(|| missing("rate"))?.to_vec(),
            }),
            NoiseType::Uniform => {
                let lower = a.ok_or_else(|| missing("a"))?;
                let upper = b.ok_or_else(|| missing("b"))?;
                if lower.len() != upper.len() {
                    return Err(MomentError::DimensionMismatch {
                        expected: lower.len(),
                        found: upper.len(),
                    });
                }
                Ok(NoiseDistribution::Uniform {
                    lower: lower.to_vec(),
                    upper: upper.to_vec(),
                })
            }
        }
    }

    pub fn noise_type(&self) -> NoiseType {
        match self {
            NoiseDistribution::Normal { .. } => NoiseType::Normal,
            NoiseDistribution::Exponential { .. } => NoiseType::Exponential,
            NoiseDistribution::Uniform { .. } => NoiseType::Uniform,
        }
    }

    /// Number of noise dimensions described.
    pub fn dimension(&self) -> usize {
        match self {
            NoiseDistribution::Normal { sigma } => sigma.len(),
            NoiseDistribution::Exponential { rate } => rate.len(),
            NoiseDistribution::Uniform { lower, .. } => lower.len(),
        }
    }

    /// Check parameter domains: `σ ≥ 0`, `rate > 0`, `a ≤ b`, all finite.
    pub fn validate(&self) -> Result<(), MomentError> {
        let invalid = |parameter, index, value, reason| MomentError::InvalidParameter {
            parameter,
            index,
            value,
            reason,
        };
        match self {
            NoiseDistribution::Normal { sigma } => {
                for (i, &s) in sigma.iter().enumerate() {
                    if !s.is_finite() || s < 0.0 {
                        return Err(invalid("sigma", i, s, "must be finite and non-negative"));
                    }
                }
            }
            NoiseDistribution::Exponential { rate } => {
                for (i, &r) in rate.iter().enumerate() {
                    if !r.is_finite() || r <= 0.0 {
                        return Err(invalid("rate", i, r, "must be finite and positive"));
                    }
                }
            }
            NoiseDistribution::Uniform { lower, upper } => {
                for (i, (&a, &b)) in lower.iter().zip(upper).enumerate() {
                    if !a.is_finite() || !b.is_finite() {
                        return Err(invalid("a", i, a, "bounds must be finite"));
                    }
                    if a > b {
                        return Err(invalid("a", i, a, "lower bound exceeds upper bound"));
                    }
                }
            }
        }
        Ok(())
    }

    /// `E[ς_dim^k]`.
    pub fn moment(&self, dim: usize, k: u32) -> Result<f64, MomentError> {
        let out_of_range = || MomentError::DimensionMismatch {
            expected: self.dimension(),
            found: dim + 1,
        };
        match self {
            NoiseDistribution::Normal { sigma } => {
                normal_moment(*sigma.get(dim).ok_or_else(out_of_range)?, k)
            }
            NoiseDistribution::Exponential { rate } => {
                exponential_moment(*rate.get(dim).ok_or_else(out_of_range)?, k)
            }
            NoiseDistribution::Uniform { lower, upper } => {
                let a = *lower.get(dim).ok_or_else(out_of_range)?;
                let b = *upper.get(dim).ok_or_else(out_of_range)?;
                Ok(uniform_moment(a, b, k))
            }
        }
    }
}
