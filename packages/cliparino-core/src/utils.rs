//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier Generation
// ─────────────────────────────────────────────────────────────────────────────

/// Generates a short lowercase alphanumeric identifier.
///
/// Used for approval request ids, which viewers have to type back into chat
/// (`!approve a3k9x2`), so they are kept short and case-insensitive.
#[must_use]
pub fn short_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_lowercase())
        .take(len)
        .collect()
}
