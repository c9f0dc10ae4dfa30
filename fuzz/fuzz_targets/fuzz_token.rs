// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use radiofracture::auth::{decode_unverified, extract_bearer_token, verify_token};

fuzz_target!(|data: &str| {
    let _ = decode_unverified(data);
    let _ = verify_token(data, "fuzzing-secret-0123456789");
    if let Some(token) = extract_bearer_token(data) {
        let _ = decode_unverified(token);
    }
});
