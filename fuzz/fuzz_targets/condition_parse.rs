//! Fuzz target for condition expressions.
//!
//! Run with: cargo +nightly fuzz run condition_parse

#![no_main]

use installkit::BooleanRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let mut booleans = BooleanRegistry::new();
    booleans.register("a", true);
    booleans.register("b", false);
    if let Ok(expr) = booleans.parse(input) {
        let _ = booleans.eval_expr(&expr);
    }
});
