#![no_main]
use libfuzzer_sys::fuzz_target;

use palisade_ir::VarRegistry;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let mut vars = VarRegistry::new();
        if vars.declare_all(&["x1", "x2", "varsigma1"]).is_err() {
            return;
        }
        // Never panics, whatever the input.
        let _ = palisade_dsl::parse_polynomial(s, "fuzz", &vars);
    }
});
