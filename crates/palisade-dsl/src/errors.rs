use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Error raised while turning an expression string into a polynomial.
///
/// Every variant carries the offending source and a span so that miette can
/// render the location.
#[derive(Debug, Error, Diagnostic)]
pub enum ExprError {
    #[error("Syntax error in {label}: {message}")]
    #[diagnostic(code(palisade::expr::syntax))]
    Syntax {
        label: String,
        message: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
    #[error("Unknown variable `{name}` in {label}")]
    #[diagnostic(
        code(palisade::expr::unknown_variable),
        help("every identifier must be listed among the declared state or noise variables")
    )]
    UnknownVariable {
        label: String,
        name: String,
        #[label("not declared")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
    #[error("Division by a non-constant expression in {label}")]
    #[diagnostic(
        code(palisade::expr::non_polynomial),
        help("only polynomial expressions are supported; divide by numeric constants only")
    )]
    NonPolynomialDivision {
        label: String,
        #[label("divisor depends on a variable")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
    #[error("Division by zero in {label}")]
    #[diagnostic(code(palisade::expr::division_by_zero))]
    DivisionByZero {
        label: String,
        #[label("evaluates to zero")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
    #[error("Exponent `{text}` in {label} is out of range (max {max})")]
    #[diagnostic(code(palisade::expr::exponent))]
    ExponentOutOfRange {
        label: String,
        text: String,
        max: u32,
        #[label("exponent")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
    #[error("Invalid numeric literal `{text}` in {label}")]
    #[diagnostic(code(palisade::expr::number))]
    InvalidNumber {
        label: String,
        text: String,
        #[label("literal")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
}

impl ExprError {
    /// Name of the input field the expression came from.
    pub fn label(&self) -> &str {
        match self {
            ExprError::Syntax { label, .. }
            | ExprError::UnknownVariable { label, .. }
            | ExprError::NonPolynomialDivision { label, .. }
            | ExprError::DivisionByZero { label, .. }
            | ExprError::ExponentOutOfRange { label, .. }
            | ExprError::InvalidNumber { label, .. } => label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_label_and_name() {
        let err = ExprError::UnknownVariable {
            label: "dynamics[0]".into(),
            name: "z".into(),
            span: (0, 1).into(),
            src: NamedSource::new("dynamics[0]", "z".to_owned()),
        };
        assert_eq!(err.to_string(), "Unknown variable `z` in dynamics[0]");
        assert_eq!(err.label(), "dynamics[0]");
    }
}
