//! Pulls the decoded payload out of ggwave's free-form diagnostic output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static DECODED_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Decoded message[^:]*:\s*'([^']*)'").expect("decoded-message pattern is valid")
});

/// First decoded payload found in `raw`, if any.
pub fn extract(raw: &str) -> Option<String> {
    DECODED_MESSAGE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Result of one decode run: the payload (empty when nothing was heard) and
/// the tool's full output for debugging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeReport {
    pub message: String,
    pub raw: String,
}

impl DecodeReport {
    pub fn from_output(raw: String) -> Self {
        let message = extract(&raw).unwrap_or_default();
        Self { message, raw }
    }

    /// Decode produced nothing usable.
    pub fn empty(raw: String) -> Self {
        Self {
            message: String::new(),
            raw,
        }
    }
}
