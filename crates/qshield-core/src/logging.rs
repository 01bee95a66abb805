//! Logging helpers with automatic sensitive data redaction.
//!
//! Key material, passwords and bearer tokens must never reach log output.
//! These wrappers make that the default at the formatting layer.

use std::fmt;

/// A wrapper that redacts its contents when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only its length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Patterns that should be redacted from free-form log text.
const SENSITIVE_PATTERNS: &[&str] = &[
    "password",
    "secret",
    "private",
    "key",
    "token",
    "credential",
    "kek",
];

/// Check if a string appears to contain sensitive data.
pub fn appears_sensitive(s: &str) -> bool {
    let lower = s.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitize a string for logging, redacting sensitive patterns.
pub fn sanitize_for_log(s: &str) -> String {
    if appears_sensitive(s) {
        "[REDACTED]".to_string()
    } else {
        s.to_string()
    }
}
