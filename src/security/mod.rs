// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trust-boundary primitives.
//!
//! Three checks stand between the listener and the use cases: the peer
//! must be loopback, the bearer token must match when one is configured,
//! and the body must stay under the configured byte cap. Each primitive
//! is a pure function so the HTTP layer stays a thin sequencer.

use futures_util::{Stream, StreamExt};
use subtle::ConstantTimeEq;

use crate::error::BridgeError;

/// Canonical loopback address forms accepted at the trust boundary.
const LOOPBACK_FORMS: [&str; 4] = ["127.0.0.1", "localhost", "::1", "::ffff:127.0.0.1"];

/// Check whether a peer address string is loopback.
///
/// Accepts the canonical forms in [`LOOPBACK_FORMS`] as-is, or with one
/// trailing `:<digits>` port suffix stripped. A suffix that is not all
/// digits is not stripped, so `localhost:abc` is rejected. Absent
/// addresses are never local.
pub fn is_localhost(addr: Option<&str>) -> bool {
    let Some(addr) = addr else {
        return false;
    };

    if LOOPBACK_FORMS.contains(&addr) {
        return true;
    }

    // "::1" would survive its own stripping ("::" + "1"), so the raw
    // match above must run first.
    if let Some((host, port)) = addr.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return LOOPBACK_FORMS.contains(&host);
        }
    }

    false
}

/// Validate an `Authorization` header against the configured token.
///
/// An empty configured token disables authentication entirely. Otherwise
/// the header must equal exactly `Bearer <token>`: case-sensitive scheme,
/// single space, nothing trailing. The comparison is constant-time.
pub fn validate_bearer_token(header: Option<&str>, token: &str) -> bool {
    if token.is_empty() {
        return true;
    }

    let Some(header) = header else {
        return false;
    };

    let expected = format!("Bearer {}", token);
    if header.len() != expected.len() {
        return false;
    }

    header.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Accumulate a request body stream, enforcing a byte cap as chunks
/// arrive.
///
/// Fails the moment the running total would exceed `max_bytes` without
/// waiting for the stream to end, so an oversized body is never buffered
/// past the limit. A body of exactly `max_bytes` succeeds. On clean
/// completion the bytes are decoded as UTF-8 (empty stream yields `""`).
pub async fn read_body_with_limit<S, B, E>(stream: S, max_bytes: usize) -> Result<String, BridgeError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures_util::pin_mut!(stream);

    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| BridgeError::internal(format!("Failed to read request body: {}", e)))?;
        let chunk = chunk.as_ref();

        if buf.len() + chunk.len() > max_bytes {
            return Err(BridgeError::validation(format!(
                "Request body exceeds maximum size of {} bytes",
                max_bytes
            )));
        }
        buf.extend_from_slice(chunk);
    }

    String::from_utf8(buf)
        .map_err(|_| BridgeError::validation("Request body is not valid UTF-8"))
}
