//! Fuzz target: status code translation.
//!
//! Every failure code must map to exactly one runtime error class, never
//! to a client programmer error, and must keep its code.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vix_core::{classify, ErrorKind, StatusCode, VixError};

fuzz_target!(|raw: u64| {
    let code = StatusCode(raw);
    let _ = code.text();
    if code.is_ok() {
        return;
    }
    let err = VixError::from_status("fuzz", code);
    assert_eq!(err.kind(), classify(code));
    assert_ne!(err.kind(), ErrorKind::ClientProgrammer);
    assert_eq!(err.code(), Some(code));
    let _ = err.to_string();
});
