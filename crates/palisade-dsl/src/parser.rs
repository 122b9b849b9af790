use miette::{NamedSource, SourceSpan};
use pest::Parser;
use pest_derive::Parser;

use palisade_ir::{Polynomial, VarRegistry};

use crate::errors::ExprError;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct ExprParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

/// Largest accepted integer exponent.
pub const MAX_EXPONENT: u32 = 64;

/// Parse one expression into a polynomial over the registry's variables.
///
/// `label` names the input field (for example `dynamics[1]`) and appears in
/// diagnostics.
pub fn parse_polynomial(
    source: &str,
    label: &str,
    vars: &VarRegistry,
) -> Result<Polynomial, ExprError> {
    let cx = Lowering {
        source,
        label,
        vars,
    };
    let pairs = ExprParser::parse(Rule::expression, source).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, p + 1),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        cx.syntax(format!("{}", e.variant.message()), start, end)
    })?;
    let sum = pairs
        .flat_map(|p| p.into_inner())
        .find(|p| p.as_rule() == Rule::sum)
        .ok_or_else(|| cx.syntax("empty expression".to_string(), 0, source.len()))?;
    cx.sum(sum)
}

/// Parse a vector of expressions; entry `i` is labelled `{field}[i]`.
pub fn parse_polynomials<S: AsRef<str>>(
    sources: &[S],
    field: &str,
    vars: &VarRegistry,
) -> Result<Vec<Polynomial>, ExprError> {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| parse_polynomial(s.as_ref(), &format!("{field}[{i}]"), vars))
        .collect()
}

struct Lowering<'a> {
    source: &'a str,
    label: &'a str,
    vars: &'a VarRegistry,
}

impl Lowering<'_> {
    fn src(&self) -> NamedSource<String> {
        NamedSource::new(self.label, self.source.to_owned())
    }

    fn span_of(pair: &Pair<'_>) -> SourceSpan {
        let s = pair.as_span();
        (s.start(), s.end() - s.start()).into()
    }

    fn syntax(&self, message: String, start: usize, end: usize) -> ExprError {
        let end = end.min(self.source.len()).max(start);
        ExprError::Syntax {
            label: self.label.to_string(),
            message,
            span: (start, end - start).into(),
            src: self.src(),
        }
    }

    fn sum(&self, pair: Pair<'_>) -> Result<Polynomial, ExprError> {
        let mut inner = pair.into_inner();
        let mut acc = match inner.next() {
            Some(first) => self.product(first)?,
            None => return Ok(Polynomial::zero()),
        };
        while let Some(op) = inner.next() {
            let Some(rhs) = inner.next() else { break };
            let rhs = self.product(rhs)?;
            acc = match op.as_str() {
                "-" => acc - rhs,
                _ => acc + rhs,
            };
        }
        Ok(acc)
    }

    fn product(&self, pair: Pair<'_>) -> Result<Polynomial, ExprError> {
        let mut inner = pair.into_inner();
        let mut acc = match inner.next() {
            Some(first) => self.unary(first)?,
            None => return Ok(Polynomial::constant(1.0)),
        };
        while let Some(op) = inner.next() {
            let Some(rhs_pair) = inner.next() else { break };
            let span = Self::span_of(&rhs_pair);
            let rhs = self.unary(rhs_pair)?;
            if op.as_str() == "/" {
                if !rhs.is_constant() {
                    return Err(ExprError::NonPolynomialDivision {
                        label: self.label.to_string(),
                        span,
                        src: self.src(),
                    });
                }
                let divisor = rhs
                    .coefficient(&palisade_ir::Monomial::one())
                    .copied()
                    .unwrap_or(0.0);
                if divisor == 0.0 {
                    return Err(ExprError::DivisionByZero {
                        label: self.label.to_string(),
                        span,
                        src: self.src(),
                    });
                }
                acc = acc.scale(1.0 / divisor);
            } else {
                acc = acc * rhs;
            }
        }
        Ok(acc)
    }

    fn unary(&self, pair: Pair<'_>) -> Result<Polynomial, ExprError> {
        let mut negations = 0usize;
        let mut value = Polynomial::zero();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::neg => negations += 1,
                _ => value = self.power(p)?,
            }
        }
        Ok(if negations % 2 == 1 { -value } else { value })
    }

    fn power(&self, pair: Pair<'_>) -> Result<Polynomial, ExprError> {
        let mut inner = pair.into_inner();
        let base = match inner.next() {
            Some(p) => self.primary(p)?,
            None => return Ok(Polynomial::zero()),
        };
        match inner.next() {
            Some(exp) => {
                let text = exp.as_str();
                let e = text
                    .parse::<u32>()
                    .ok()
                    .filter(|e| *e <= MAX_EXPONENT)
                    .ok_or_else(|| ExprError::ExponentOutOfRange {
                        label: self.label.to_string(),
                        text: text.to_string(),
                        max: MAX_EXPONENT,
                        span: Self::span_of(&exp),
                        src: self.src(),
                    })?;
                Ok(base.pow(e))
            }
            None => Ok(base),
        }
    }

    fn primary(&self, pair: Pair<'_>) -> Result<Polynomial, ExprError> {
        match pair.as_rule() {
            Rule::number => {
                let text = pair.as_str();
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(Polynomial::constant)
                    .ok_or_else(|| ExprError::InvalidNumber {
                        label: self.label.to_string(),
                        text: text.to_string(),
                        span: Self::span_of(&pair),
                        src: self.src(),
                    })
            }
            Rule::ident => {
                let name = pair.as_str();
                self.vars
                    .lookup(name)
                    .map(Polynomial::var)
                    .ok_or_else(|| ExprError::UnknownVariable {
                        label: self.label.to_string(),
                        name: name.to_string(),
                        span: Self::span_of(&pair),
                        src: self.src(),
                    })
            }
            Rule::sum => self.sum(pair),
            other => {
                let s = pair.as_span();
                Err(self.syntax(format!("unexpected {other:?}"), s.start(), s.end()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palisade_ir::{Monomial, VarId};

    fn registry() -> VarRegistry {
        let mut reg = VarRegistry::new();
        reg.declare_all(&["x1", "x2", "varsigma1"]).unwrap();
        reg
    }

    fn x(i: u32) -> Polynomial {
        Polynomial::var(VarId(i))
    }

    #[test]
    fn parses_linear_dynamics() {
        let p = parse_polynomial("0.5*x1 - 2*x2 + 3", "f", &registry()).unwrap();
        let expected = x(0).scale(0.5) - x(1).scale(2.0) + Polynomial::constant(3.0);
        assert_eq!(p, expected);
    }

    #[test]
    fn both_power_operators_are_accepted() {
        let reg = registry();
        let a = parse_polynomial("x1^3", "f", &reg).unwrap();
        let b = parse_polynomial("x1 ** 3", "f", &reg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, x(0).pow(3));
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let p = parse_polynomial("-x1^2", "f", &registry()).unwrap();
        assert_eq!(p, -x(0).pow(2));
        let q = parse_polynomial("2*-x1", "f", &registry()).unwrap();
        assert_eq!(q, x(0).scale(-2.0));
    }

    #[test]
    fn parentheses_and_scientific_literals() {
        let p = parse_polynomial("(x1 + 1)^2 * 1e-1", "f", &registry()).unwrap();
        let expected = (x(0) + Polynomial::constant(1.0)).pow(2).scale(0.1);
        assert_eq!(p.len(), expected.len());
        for (m, c) in expected.terms() {
            let got = p.coefficient(m).copied().unwrap_or(0.0);
            assert!((got - c).abs() < 1e-12, "{m:?}: {got} vs {c}");
        }
    }

    #[test]
    fn division_by_constant_scales() {
        let p = parse_polynomial("x1^3 / 3", "f", &registry()).unwrap();
        let c = p
            .coefficient(&Monomial::from_powers([(VarId(0), 3)]))
            .copied()
            .unwrap();
        assert!((c - 1.0 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn division_by_variable_is_rejected() {
        let err = parse_polynomial("1 / x1", "dynamics[0]", &registry()).unwrap_err();
        assert!(matches!(err, ExprError::NonPolynomialDivision { .. }));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let err = parse_polynomial("x1 / (2 - 2)", "f", &registry()).unwrap_err();
        assert!(matches!(err, ExprError::DivisionByZero { .. }));
    }

    #[test]
    fn unknown_identifier_is_reported_with_name() {
        let err = parse_polynomial("x1 + y", "dynamics[0]", &registry()).unwrap_err();
        match err {
            ExprError::UnknownVariable { name, label, .. } => {
                assert_eq!(name, "y");
                assert_eq!(label, "dynamics[0]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn huge_exponent_is_rejected() {
        let err = parse_polynomial("x1^1000", "f", &registry()).unwrap_err();
        assert!(matches!(err, ExprError::ExponentOutOfRange { .. }));
    }

    #[test]
    fn malformed_input_is_a_syntax_error() {
        for src in ["", "x1 +", "x1 ** x2", "(x1", "3 4"] {
            let err = parse_polynomial(src, "f", &registry()).unwrap_err();
            assert!(matches!(err, ExprError::Syntax { .. }), "{src:?} gave {err}");
        }
    }

    #[test]
    fn vector_parse_labels_entries() {
        let reg = registry();
        let err = parse_polynomials(&["x1", "zz"], "dynamics", &reg).unwrap_err();
        assert_eq!(err.label(), "dynamics[1]");
        let ok = parse_polynomials(&["x1", "x2 + varsigma1"], "dynamics", &reg).unwrap();
        assert_eq!(ok.len(), 2);
    }
}
