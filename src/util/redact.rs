//! Helpers for keeping credentials out of diagnostics.

/// Placeholder printed in place of a secret.
pub const REDACTED: &str = "***";

/// Return `value` when `reveal` is set, otherwise the placeholder.
pub fn secret(value: &str, reveal: bool) -> &str {
    if reveal { value } else { REDACTED }
}
