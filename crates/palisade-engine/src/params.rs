//! Parameter records and their validated form.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use palisade_dsl::{parse_polynomials, ExprError};
use palisade_ir::{HyperRectangle, PolyError, Polynomial, VarId, VarRegistry};

use crate::result::FailureKind;

/// Time domain and noise presence of the system under study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SystemMode {
    DiscreteDeterministic,
    DiscreteStochastic,
    ContinuousDeterministic,
    ContinuousStochastic,
}

impl SystemMode {
    pub const ALL: [SystemMode; 4] = [
        SystemMode::DiscreteDeterministic,
        SystemMode::DiscreteStochastic,
        SystemMode::ContinuousDeterministic,
        SystemMode::ContinuousStochastic,
    ];

    pub fn is_stochastic(self) -> bool {
        matches!(
            self,
            SystemMode::DiscreteStochastic | SystemMode::ContinuousStochastic
        )
    }

    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            SystemMode::DiscreteDeterministic | SystemMode::DiscreteStochastic
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SystemMode::DiscreteDeterministic => "discrete_deterministic",
            SystemMode::DiscreteStochastic => "discrete_stochastic",
            SystemMode::ContinuousDeterministic => "continuous_deterministic",
            SystemMode::ContinuousStochastic => "continuous_stochastic",
        }
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemMode {
    type Err = InputError;

    /// Case-insensitive; `-` and spaces are accepted as separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        SystemMode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| InputError::UnknownMode(s.to_string()))
    }
}

impl TryFrom<String> for SystemMode {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

fn default_solver() -> String {
    "csdp".to_string()
}

/// Caller-facing parameter record, everything but the barrier degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub dim: usize,
    pub initial_lower: Vec<f64>,
    pub initial_upper: Vec<f64>,
    /// One lower-bound vector per unsafe region.
    pub unsafe_lower: Vec<Vec<f64>>,
    pub unsafe_upper: Vec<Vec<f64>>,
    pub space_lower: Vec<f64>,
    pub space_upper: Vec<f64>,
    pub state_vars: Vec<String>,
    /// One polynomial expression per state dimension.
    pub dynamics: Vec<String>,
    /// Degree of every Lagrangian multiplier; defaults to the barrier degree.
    #[serde(default)]
    pub multiplier_degree: Option<u32>,
    #[serde(default = "default_solver")]
    pub solver: String,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub lambda: Option<f64>,
    #[serde(default)]
    pub stochastic: Option<StochasticParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StochasticParams {
    pub time_horizon: f64,
    /// Target confidence; absent and `0` both mean no target.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub c: Option<f64>,
    #[serde(default)]
    pub optimize: bool,
    pub noise: NoiseSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseSpec {
    /// Additive noise symbols for discrete-time dynamics.
    Discrete {
        noise_vars: Vec<String>,
        noise_type: String,
        #[serde(default)]
        sigma: Option<Vec<f64>>,
        #[serde(default)]
        rate: Option<Vec<f64>>,
        #[serde(default)]
        a: Option<Vec<f64>>,
        #[serde(default)]
        b: Option<Vec<f64>>,
    },
    /// Jump-diffusion for continuous-time dynamics.
    JumpDiffusion {
        diffusion: Vec<String>,
        jump_reset: Vec<f64>,
        jump_rate: Vec<f64>,
    },
}

impl NoiseSpec {
    fn kind_name(&self) -> &'static str {
        match self {
            NoiseSpec::Discrete { .. } => "discrete",
            NoiseSpec::JumpDiffusion { .. } => "jump_diffusion",
        }
    }
}

/// One synthesis attempt: mode, barrier degree and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisJob {
    pub mode: SystemMode,
    pub degree: u32,
    pub params: SynthesisParams,
}

/// Errors in the shape of the input. These are returned to the caller
/// instead of being folded into a failure record.
#[derive(Debug, Error, Diagnostic)]
pub enum InputError {
    #[error("Dimension mismatch: `{field}` has length {found}, expected {expected}")]
    #[diagnostic(code(palisade::input::dimension))]
    DimensionMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("Unsafe regions were not defined correctly: {lower} lower bound(s) but {upper} upper bound(s)")]
    #[diagnostic(code(palisade::input::region))]
    RegionMismatch { lower: usize, upper: usize },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Expression(#[from] ExprError),
    #[error("Invalid variable declaration: {0}")]
    #[diagnostic(code(palisade::input::variable))]
    Variable(#[from] PolyError),
    #[error("Mode {mode} requires a `stochastic` parameter block")]
    #[diagnostic(code(palisade::input::stochastic))]
    MissingStochastic { mode: SystemMode },
    #[error("Mode {mode} does not accept `{found}` noise")]
    #[diagnostic(
        code(palisade::input::noise),
        help("discrete-time modes take `discrete` noise, continuous-time modes take `jump_diffusion`")
    )]
    NoiseModelMismatch { mode: SystemMode, found: &'static str },
    #[error("Unknown system mode `{0}`")]
    #[diagnostic(code(palisade::input::mode))]
    UnknownMode(String),
    #[error("Maximum degree {max_degree} is above the supported ceiling of {limit}")]
    #[diagnostic(code(palisade::input::degree))]
    DegreeCeiling { max_degree: u32, limit: u32 },
}

impl InputError {
    /// Failure kind used when a per-attempt input error is folded into a
    /// sweep report.
    pub fn kind(&self) -> FailureKind {
        match self {
            InputError::DimensionMismatch { .. } => FailureKind::DimensionMismatch,
            InputError::RegionMismatch { .. } => FailureKind::RegionMismatch,
            _ => FailureKind::ParameterDomainError,
        }
    }
}

/// Parsed noise model.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    Discrete {
        noise_vars: Vec<VarId>,
        noise_type: String,
        sigma: Option<Vec<f64>>,
        rate: Option<Vec<f64>>,
        a: Option<Vec<f64>>,
        b: Option<Vec<f64>>,
    },
    JumpDiffusion {
        diffusion: Vec<Polynomial>,
        jump_reset: Vec<f64>,
        jump_rate: Vec<f64>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticSetting {
    pub time_horizon: f64,
    /// `None` when no target was given or the target was `0`.
    pub confidence: Option<f64>,
    pub c: Option<f64>,
    pub optimize: bool,
    pub noise: NoiseModel,
}

/// A job whose shape has been checked and whose expressions are parsed.
#[derive(Debug, Clone)]
pub struct CertificateProblem {
    pub mode: SystemMode,
    pub degree: u32,
    pub multiplier_degree: u32,
    pub vars: VarRegistry,
    pub state: Vec<VarId>,
    pub initial: HyperRectangle,
    pub unsafe_regions: Vec<HyperRectangle>,
    pub space: HyperRectangle,
    pub dynamics: Vec<Polynomial>,
    pub solver: String,
    pub gamma: Option<f64>,
    pub lambda: Option<f64>,
    pub stochastic: Option<StochasticSetting>,
}

fn check_len(field: &str, expected: usize, found: usize) -> Result<(), InputError> {
    if expected == found {
        Ok(())
    } else {
        Err(InputError::DimensionMismatch {
            field: field.to_string(),
            expected,
            found,
        })
    }
}

impl CertificateProblem {
    /// Validate shapes and parse every expression of a job.
    pub fn from_job(job: &SynthesisJob) -> Result<Self, InputError> {
        let p = &job.params;
        let dim = p.dim;
        check_len("initial_lower", dim, p.initial_lower.len())?;
        check_len("initial_upper", dim, p.initial_upper.len())?;
        check_len("space_lower", dim, p.space_lower.len())?;
        check_len("space_upper", dim, p.space_upper.len())?;
        check_len("state_vars", dim, p.state_vars.len())?;
        check_len("dynamics", dim, p.dynamics.len())?;

        if p.unsafe_lower.len() != p.unsafe_upper.len() {
            return Err(InputError::RegionMismatch {
                lower: p.unsafe_lower.len(),
                upper: p.unsafe_upper.len(),
            });
        }
        for (j, (lower, upper)) in p.unsafe_lower.iter().zip(&p.unsafe_upper).enumerate() {
            check_len(&format!("unsafe_lower[{j}]"), dim, lower.len())?;
            check_len(&format!("unsafe_upper[{j}]"), dim, upper.len())?;
        }

        let mut vars = VarRegistry::new();
        let state = vars.declare_all(&p.state_vars)?;

        let stochastic = if job.mode.is_stochastic() {
            let s = p
                .stochastic
                .as_ref()
                .ok_or(InputError::MissingStochastic { mode: job.mode })?;
            Some(Self::stochastic_setting(job.mode, dim, s, &mut vars)?)
        } else {
            if p.stochastic.is_some() {
                warn!(mode = %job.mode, "ignoring stochastic parameters for a deterministic mode");
            }
            None
        };

        let dynamics = parse_polynomials(&p.dynamics, "dynamics", &vars)?;
        let stochastic = match stochastic {
            Some((setting, diffusion_src)) => {
                let mut setting = setting;
                if let (
                    Some(src),
                    NoiseModel::JumpDiffusion {
                        ref mut diffusion, ..
                    },
                ) = (diffusion_src, &mut setting.noise)
                {
                    *diffusion = parse_polynomials(src, "diffusion", &vars)?;
                }
                Some(setting)
            }
            None => None,
        };

        Ok(Self {
            mode: job.mode,
            degree: job.degree,
            multiplier_degree: p.multiplier_degree.unwrap_or(job.degree),
            vars,
            state,
            initial: HyperRectangle::new(p.initial_lower.clone(), p.initial_upper.clone()),
            unsafe_regions: p
                .unsafe_lower
                .iter()
                .zip(&p.unsafe_upper)
                .map(|(l, u)| HyperRectangle::new(l.clone(), u.clone()))
                .collect(),
            space: HyperRectangle::new(p.space_lower.clone(), p.space_upper.clone()),
            dynamics,
            solver: p.solver.clone(),
            gamma: p.gamma,
            lambda: p.lambda,
            stochastic,
        })
    }

    /// Shape-check the stochastic block. Discrete noise symbols are declared
    /// in `vars`; diffusion sources are returned for parsing once every
    /// variable is known.
    fn stochastic_setting<'a>(
        mode: SystemMode,
        dim: usize,
        s: &'a StochasticParams,
        vars: &mut VarRegistry,
    ) -> Result<(StochasticSetting, Option<&'a [String]>), InputError> {
        let mismatch = || InputError::NoiseModelMismatch {
            mode,
            found: s.noise.kind_name(),
        };
        let (noise, diffusion_src) = match &s.noise {
            NoiseSpec::Discrete {
                noise_vars,
                noise_type,
                sigma,
                rate,
                a,
                b,
            } => {
                if !mode.is_discrete() {
                    return Err(mismatch());
                }
                let n = noise_vars.len();
                for (field, values) in [("sigma", sigma), ("rate", rate), ("a", a), ("b", b)] {
                    if let Some(values) = values {
                        check_len(field, n, values.len())?;
                    }
                }
                let ids = vars.declare_all(noise_vars)?;
                (
                    NoiseModel::Discrete {
                        noise_vars: ids,
                        noise_type: noise_type.clone(),
                        sigma: sigma.clone(),
                        rate: rate.clone(),
                        a: a.clone(),
                        b: b.clone(),
                    },
                    None,
                )
            }
            NoiseSpec::JumpDiffusion {
                diffusion,
                jump_reset,
                jump_rate,
            } => {
                if mode.is_discrete() {
                    return Err(mismatch());
                }
                check_len("diffusion", dim, diffusion.len())?;
                check_len("jump_reset", dim, jump_reset.len())?;
                check_len("jump_rate", dim, jump_rate.len())?;
                (
                    NoiseModel::JumpDiffusion {
                        diffusion: Vec::new(),
                        jump_reset: jump_reset.clone(),
                        jump_rate: jump_rate.clone(),
                    },
                    Some(diffusion.as_slice()),
                )
            }
        };
        Ok((
            StochasticSetting {
                time_horizon: s.time_horizon,
                confidence: s.confidence.filter(|phi| *phi != 0.0),
                c: s.c,
                optimize: s.optimize,
                noise,
            },
            diffusion_src,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SynthesisParams {
        SynthesisParams {
            dim: 1,
            initial_lower: vec![-0.5],
            initial_upper: vec![0.5],
            unsafe_lower: vec![vec![-6.0]],
            unsafe_upper: vec![vec![-5.0]],
            space_lower: vec![-6.0],
            space_upper: vec![6.0],
            state_vars: vec!["x1".into()],
            dynamics: vec!["0.5*x1".into()],
            multiplier_degree: None,
            solver: "csdp".into(),
            gamma: None,
            lambda: None,
            stochastic: None,
        }
    }

    fn job(mode: SystemMode, params: SynthesisParams) -> SynthesisJob {
        SynthesisJob {
            mode,
            degree: 2,
            params,
        }
    }

    #[test]
    fn mode_parsing_accepts_common_spellings() {
        assert_eq!(
            "Discrete-Stochastic".parse::<SystemMode>().unwrap(),
            SystemMode::DiscreteStochastic
        );
        assert_eq!(
            "continuous deterministic".parse::<SystemMode>().unwrap(),
            SystemMode::ContinuousDeterministic
        );
        assert!("hybrid".parse::<SystemMode>().is_err());
        assert!(SystemMode::ContinuousStochastic.is_stochastic());
        assert!(!SystemMode::ContinuousStochastic.is_discrete());
    }

    #[test]
    fn deterministic_problem_is_built() {
        let problem =
            CertificateProblem::from_job(&job(SystemMode::DiscreteDeterministic, params())).unwrap();
        assert_eq!(problem.state, vec![VarId(0)]);
        assert_eq!(problem.multiplier_degree, 2);
        assert_eq!(problem.unsafe_regions.len(), 1);
        assert_eq!(problem.dynamics[0], Polynomial::var(VarId(0)).scale(0.5));
    }

    #[test]
    fn short_bound_vector_is_a_dimension_mismatch() {
        let mut p = params();
        p.space_upper = vec![];
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteDeterministic, p)).unwrap_err();
        assert!(matches!(
            err,
            InputError::DimensionMismatch { ref field, expected: 1, found: 0 } if field == "space_upper"
        ));
        assert_eq!(err.kind(), FailureKind::DimensionMismatch);
    }

    #[test]
    fn unequal_unsafe_lists_are_a_region_mismatch() {
        let mut p = params();
        p.unsafe_upper.push(vec![6.0]);
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteDeterministic, p)).unwrap_err();
        assert!(matches!(err, InputError::RegionMismatch { lower: 1, upper: 2 }));
    }

    #[test]
    fn stochastic_modes_need_matching_noise() {
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteStochastic, params()))
            .unwrap_err();
        assert!(matches!(err, InputError::MissingStochastic { .. }));

        let mut p = params();
        p.stochastic = Some(StochasticParams {
            time_horizon: 5.0,
            confidence: Some(0.0),
            c: None,
            optimize: false,
            noise: NoiseSpec::JumpDiffusion {
                diffusion: vec!["0.1".into()],
                jump_reset: vec![0.0],
                jump_rate: vec![0.0],
            },
        });
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteStochastic, p.clone()))
            .unwrap_err();
        assert!(matches!(err, InputError::NoiseModelMismatch { .. }));

        let problem =
            CertificateProblem::from_job(&job(SystemMode::ContinuousStochastic, p)).unwrap();
        let setting = problem.stochastic.unwrap();
        assert_eq!(setting.confidence, None);
        match setting.noise {
            NoiseModel::JumpDiffusion { diffusion, .. } => {
                assert_eq!(diffusion, vec![Polynomial::constant(0.1)]);
            }
            other => panic!("unexpected noise model {other:?}"),
        }
    }

    #[test]
    fn discrete_noise_symbols_are_usable_in_dynamics() {
        let mut p = params();
        p.dynamics = vec!["0.5*x1 + varsigma1".into()];
        p.stochastic = Some(StochasticParams {
            time_horizon: 5.0,
            confidence: None,
            c: None,
            optimize: false,
            noise: NoiseSpec::Discrete {
                noise_vars: vec!["varsigma1".into()],
                noise_type: "normal".into(),
                sigma: Some(vec![0.1]),
                rate: None,
                a: None,
                b: None,
            },
        });
        let problem = CertificateProblem::from_job(&job(SystemMode::DiscreteStochastic, p.clone()))
            .unwrap();
        assert_eq!(problem.vars.lookup("varsigma1"), Some(VarId(1)));

        // noise symbols are unknown to deterministic modes
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteDeterministic, p))
            .unwrap_err();
        assert!(matches!(err, InputError::Expression(ExprError::UnknownVariable { .. })));
    }

    #[test]
    fn noise_parameter_lengths_follow_noise_vars() {
        let mut p = params();
        p.stochastic = Some(StochasticParams {
            time_horizon: 1.0,
            confidence: None,
            c: None,
            optimize: false,
            noise: NoiseSpec::Discrete {
                noise_vars: vec!["s1".into()],
                noise_type: "normal".into(),
                sigma: Some(vec![0.1, 0.2]),
                rate: None,
                a: None,
                b: None,
            },
        });
        let err = CertificateProblem::from_job(&job(SystemMode::DiscreteStochastic, p)).unwrap_err();
        assert!(matches!(err, InputError::DimensionMismatch { ref field, .. } if field == "sigma"));
    }

    #[test]
    fn records_deserialize_with_defaults() {
        let json = r#"{
            "mode": "discrete_deterministic",
            "degree": 4,
            "params": {
                "dim": 1,
                "initial_lower": [-0.5], "initial_upper": [0.5],
                "unsafe_lower": [[-6.0]], "unsafe_upper": [[-5.0]],
                "space_lower": [-6.0], "space_upper": [6.0],
                "state_vars": ["x1"],
                "dynamics": ["0.5*x1"]
            }
        }"#;
        let job: SynthesisJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.params.solver, "csdp");
        assert_eq!(job.params.multiplier_degree, None);
        assert_eq!(job.degree, 4);
    }
}
