//! Fuzz target: `ConnectionConfig` construction from `VIX_*` variables.
//!
//! The input is split on NUL bytes into port, provider and timeout values.
//! Malformed values must be rejected with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vix_client::ConnectionConfig;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut parts = text.split('\0');
    let port = parts.next().map(str::to_owned);
    let provider = parts.next().map(str::to_owned);
    let timeout = parts.next().map(str::to_owned);

    let _ = ConnectionConfig::from_lookup(|name| match name {
        "VIX_PORT" => port.clone(),
        "VIX_PROVIDER" => provider.clone(),
        "VIX_JOB_TIMEOUT_SECS" => timeout.clone(),
        _ => None,
    });
});
