//! The parser must reject malformed input with an error, never a panic.

use palisade_dsl::parse_polynomial;
use palisade_ir::VarRegistry;
use proptest::prelude::*;

fn registry() -> VarRegistry {
    let mut reg = VarRegistry::new();
    reg.declare_all(&["x1", "x2"]).unwrap();
    reg
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(src in "\\PC{0,40}") {
        let _ = parse_polynomial(&src, "fuzz", &registry());
    }

    #[test]
    fn operator_soup_never_panics(src in "[x12 +*/^().e-]{0,30}") {
        let _ = parse_polynomial(&src, "fuzz", &registry());
    }

    #[test]
    fn integer_polynomials_evaluate_like_their_text(
        a in -20i32..20, b in -20i32..20, k in 0u32..5, x in -3i32..3,
    ) {
        let src = format!("{a}*x1^{k} + {b}");
        let p = parse_polynomial(&src, "f", &registry()).unwrap();
        let expected = (a as f64) * (x as f64).powi(k as i32) + b as f64;
        prop_assert_eq!(p.eval(&[x as f64, 0.0]), expected);
    }
}
