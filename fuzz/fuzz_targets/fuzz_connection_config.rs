//! Fuzz target: JSON deserialization of `ConnectionConfig`.
//!
//! Arbitrary bytes must never panic the parser, and a parsed config must
//! never serialise a password back out.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vix_client::ConnectionConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<ConnectionConfig>(data) else {
        return;
    };
    let _ = config.job_timeout();
    let _ = format!("{config:?}");
    if let Ok(json) = serde_json::to_value(&config) {
        if let Some(credentials) = json.get("credentials").and_then(|c| c.as_object()) {
            assert!(!credentials.contains_key("password"), "password serialised");
        }
    }
});
