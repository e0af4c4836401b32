//! API-key check for the HTTP-facing transports.

use axum::http::HeaderMap;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Byte comparison that does not short-circuit on the first mismatch.
/// Lengths are compared first; equal-length inputs always scan fully.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// True when the request may proceed: no key is configured, or the
/// `X-Api-Key` header matches.
pub fn api_key_ok(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(provided) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}
