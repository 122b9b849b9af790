use std::fmt;

use serde::{Deserialize, Serialize};

use palisade_ir::Polynomial;

use crate::params::SystemMode;

/// Classification of a failed synthesis attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DimensionMismatch,
    RegionMismatch,
    ParameterDomainError,
    UnsupportedNoiseType,
    SolverInvocationFailure,
    /// Constant barrier, empty SOS decomposition or misordered level scalars.
    DegenerateCertificate,
    DegenerateDenominator,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::DimensionMismatch => "dimension_mismatch",
            FailureKind::RegionMismatch => "region_mismatch",
            FailureKind::ParameterDomainError => "parameter_domain_error",
            FailureKind::UnsupportedNoiseType => "unsupported_noise_type",
            FailureKind::SolverInvocationFailure => "solver_invocation_failure",
            FailureKind::DegenerateCertificate => "degenerate_certificate",
            FailureKind::DegenerateDenominator => "degenerate_denominator",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated barrier certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierCertificate {
    pub mode: SystemMode,
    pub degree: u32,
    pub barrier: Polynomial,
    /// The barrier rendered with the caller's variable names.
    pub barrier_expr: String,
    pub gamma: f64,
    pub lambda: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<f64>,
    /// `1 - (gamma + c*T) / lambda`, stochastic modes only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// SHA-256 of the SDPA rendering of the solved program.
    pub program_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisFailure {
    pub kind: FailureKind,
    pub error: String,
    pub degree: u32,
}

/// Tagged result of one synthesis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SynthesisOutcome {
    Success(BarrierCertificate),
    Failure(SynthesisFailure),
}

impl SynthesisOutcome {
    pub fn failure(kind: FailureKind, error: impl Into<String>, degree: u32) -> Self {
        SynthesisOutcome::Failure(SynthesisFailure {
            kind,
            error: error.into(),
            degree,
        })
    }

    pub fn degree(&self) -> u32 {
        match self {
            SynthesisOutcome::Success(cert) => cert.degree,
            SynthesisOutcome::Failure(failure) => failure.degree,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SynthesisOutcome::Success(_))
    }

    pub fn certificate(&self) -> Option<&BarrierCertificate> {
        match self {
            SynthesisOutcome::Success(cert) => Some(cert),
            SynthesisOutcome::Failure(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            SynthesisOutcome::Success(_) => None,
            SynthesisOutcome::Failure(failure) => Some(failure.kind),
        }
    }
}

/// Final record of a degree sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Found {
        certificate: BarrierCertificate,
        /// Failures observed before the winner was chosen.
        failures: Vec<SynthesisFailure>,
    },
    NoResult {
        attempted: Vec<u32>,
        failures: Vec<SynthesisFailure>,
    },
}

impl SweepOutcome {
    pub fn certificate(&self) -> Option<&BarrierCertificate> {
        match self {
            SweepOutcome::Found { certificate, .. } => Some(certificate),
            SweepOutcome::NoResult { .. } => None,
        }
    }

    pub fn failures(&self) -> &[SynthesisFailure] {
        match self {
            SweepOutcome::Found { failures, .. } | SweepOutcome::NoResult { failures, .. } => {
                failures
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_tagged_by_status() {
        let failure = SynthesisOutcome::failure(FailureKind::RegionMismatch, "bad regions", 4);
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "region_mismatch");
        assert_eq!(json["degree"], 4);
        let back: SynthesisOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
        assert_eq!(back.failure_kind(), Some(FailureKind::RegionMismatch));
    }

    #[test]
    fn deterministic_certificates_omit_stochastic_fields() {
        let cert = BarrierCertificate {
            mode: SystemMode::DiscreteDeterministic,
            degree: 2,
            barrier: Polynomial::constant(1.0),
            barrier_expr: "1".into(),
            gamma: 1.0,
            lambda: 2.0,
            c: None,
            confidence: None,
            program_digest: "00".into(),
        };
        let json = serde_json::to_value(SynthesisOutcome::Success(cert)).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("c").is_none());
        assert!(json.get("confidence").is_none());
    }
}
