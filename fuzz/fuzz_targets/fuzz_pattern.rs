//! Fuzz testing for the route pattern compiler and matcher.
//!
//! Any pattern string must compile, and matching any path against it must
//! terminate without panicking. When a match succeeds it must yield one
//! capture per declared parameter name.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_pattern
//! cargo +nightly fuzz run fuzz_pattern -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use waypoint::routing::compile;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    pattern: &'a str,
    path: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let compiled = compile(input.pattern);
    assert_eq!(compiled.matcher.capture_count(), compiled.param_names.len());

    if let Some(values) = compiled.matcher.captures(input.path) {
        assert_eq!(values.len(), compiled.param_names.len());
        assert!(compiled.matcher.is_match(input.path));
    }

    // A pattern without tokens is a literal path.
    if !input.pattern.contains([':', '*']) {
        assert_eq!(
            compiled.matcher.is_match(input.path),
            input.pattern == input.path
        );
    }
});
