//! Fuzz testing for client identity resolution.
//!
//! Header values arrive straight off the wire, so resolution must accept
//! anything and always produce a usable bucket key.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_client_identity -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use edge_layer::middleware::{CidrRange, resolve_client_identity};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    forwarded_for: Option<&'a str>,
    real_ip: Option<&'a str>,
    remote_addr: Option<&'a str>,
    cidr: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let identity = resolve_client_identity(input.forwarded_for, input.real_ip, input.remote_addr);
    assert!(!identity.is_empty());

    // Parsing must reject or accept, never panic
    let _ = input.cidr.parse::<CidrRange>();
});
