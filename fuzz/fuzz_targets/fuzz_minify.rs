//! Fuzz testing for the minifiers.
//!
//! Checks that neither minifier panics on arbitrary bytes and that JSON
//! minification only ever removes whitespace between tokens. The expected
//! output is computed here independently, so a minifier that reformats a
//! number or collapses a repeated key fails even when the parsed value
//! would compare equal.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_minify -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use edge_layer::{ContentKind, minify};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    html: bool,
    body: Vec<u8>,
}

/// Drop JSON whitespace that sits outside string literals.
fn strip_insignificant_whitespace(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut in_string = false;
    let mut bytes = input.iter().copied();

    while let Some(byte) = bytes.next() {
        if in_string {
            out.push(byte);
            match byte {
                b'\\' => out.extend(bytes.next()),
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }

    out
}

fuzz_target!(|input: Input| {
    let kind = if input.html {
        ContentKind::Html
    } else {
        ContentKind::Json
    };

    let Ok(minified) = minify(kind, &input.body) else {
        return;
    };

    if kind == ContentKind::Json {
        assert_eq!(&minified[..], &strip_insignificant_whitespace(&input.body)[..]);
    }
});
